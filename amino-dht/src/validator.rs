// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Record validation, dispatched by key namespace.
//!
//! Keys are formatted `/<namespace>/<rest>`; a [`NamespacedValidator`] routes
//! each operation to the validator registered for the namespace. The Amino
//! deployment fixes the validator set to exactly `pk` and `ipns`.

use std::{collections::HashMap, sync::Arc};

use sha2::{Digest, Sha256};

use crate::{
    error::{DhtError, Result},
    protocol::PROTOCOL_PREFIX,
};

/// Multihash code for sha2-256.
const MULTIHASH_SHA2_256: u8 = 0x12;

/// Validates records and selects the best of several candidates.
pub trait Validator: Send + Sync + 'static {
    /// Check that `value` is a well-formed, currently-acceptable record for
    /// `key`.
    fn validate(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Pick the index of the best candidate among `values`.
    fn select(&self, key: &[u8], values: &[Vec<u8>]) -> Result<usize>;
}

/// Split a `/<namespace>/<rest>` key.
fn split_key(key: &[u8]) -> Result<(&str, &[u8])> {
    let invalid = || DhtError::InvalidRecordType {
        namespace: String::new(),
    };
    let rest = key.strip_prefix(b"/").ok_or_else(invalid)?;
    let slash = rest.iter().position(|b| *b == b'/').ok_or_else(invalid)?;
    let namespace = std::str::from_utf8(&rest[..slash]).map_err(|_| invalid())?;
    if namespace.is_empty() {
        return Err(invalid());
    }
    Ok((namespace, &rest[slash + 1..]))
}

/// A validator composed of per-namespace validators.
#[derive(Clone, Default)]
pub struct NamespacedValidator {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl NamespacedValidator {
    /// An empty composition; add entries with [`NamespacedValidator::insert`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `validator` for `namespace`, replacing any previous entry.
    pub fn insert(&mut self, namespace: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators.insert(namespace.into(), validator);
    }

    /// The registered namespaces, unordered.
    pub fn namespaces(&self) -> Vec<&str> {
        self.validators.keys().map(String::as_str).collect()
    }

    /// Whether `namespace` has a validator.
    pub fn contains(&self, namespace: &str) -> bool {
        self.validators.contains_key(namespace)
    }

    fn validator_for(&self, key: &[u8]) -> Result<&Arc<dyn Validator>> {
        let (namespace, _) = split_key(key)?;
        self.validators
            .get(namespace)
            .ok_or_else(|| DhtError::InvalidRecordType {
                namespace: namespace.to_string(),
            })
    }
}

impl Validator for NamespacedValidator {
    fn validate(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.validator_for(key)?.validate(key, value)
    }

    fn select(&self, key: &[u8], values: &[Vec<u8>]) -> Result<usize> {
        if values.is_empty() {
            return Err(DhtError::NoValues);
        }
        self.validator_for(key)?.select(key, values)
    }
}

/// Validator for `/pk/` records: the value must be the public key whose
/// sha2-256 multihash is embedded in the key.
#[derive(Clone, Copy, Debug, Default)]
pub struct PublicKeyValidator;

impl Validator for PublicKeyValidator {
    fn validate(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let (namespace, hash) = split_key(key)?;
        if namespace != "pk" {
            return Err(DhtError::InvalidRecordType {
                namespace: namespace.to_string(),
            });
        }
        if hash.len() != 34 || hash[0] != MULTIHASH_SHA2_256 || hash[1] != 32 {
            return Err(DhtError::Malformed(
                "public key record key is not a sha2-256 multihash".to_string(),
            ));
        }
        let digest = Sha256::digest(value);
        if digest.as_slice() != &hash[2..] {
            return Err(DhtError::Malformed(
                "public key does not match storage key".to_string(),
            ));
        }
        Ok(())
    }

    fn select(&self, _key: &[u8], values: &[Vec<u8>]) -> Result<usize> {
        if values.is_empty() {
            return Err(DhtError::NoValues);
        }
        // All valid public-key records for a key are identical.
        Ok(0)
    }
}

/// Check that a routing configuration using the Amino protocol prefix carries
/// exactly the Amino validator shape: the `pk` and `ipns` namespaces and
/// nothing else.
pub fn ensure_amino_validator_shape(
    protocol_prefix: &str,
    validator: &NamespacedValidator,
) -> Result<()> {
    if protocol_prefix != PROTOCOL_PREFIX {
        return Ok(());
    }
    let mut namespaces = validator.namespaces();
    namespaces.sort_unstable();
    if namespaces != ["ipns", "pk"] {
        return Err(DhtError::ConfigInvalid(format!(
            "the Amino prefix requires exactly the pk and ipns validators, found {namespaces:?}"
        )));
    }
    Ok(())
}
