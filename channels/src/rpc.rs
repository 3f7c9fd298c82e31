//! RPC types and the registry that assigns their wire ids.

use std::collections::HashMap;

use bitstream::{BitReader, BitResult, BitWriter};
use blake3::Hasher;

use crate::error::{RpcError, RpcResult};

/// A remote procedure call payload.
///
/// `NAME` must be unique within a registry; ids are assigned by sorted name
/// so both peers agree without exchanging them.
pub trait Rpc: Sized + Send + 'static {
    const NAME: &'static str;

    fn write(&self, writer: &mut BitWriter) -> BitResult<()>;

    fn read(reader: &mut BitReader<'_>) -> BitResult<Self>;
}

/// Wire id of a registered rpc type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RpcKind(pub u16);

/// A serialized rpc awaiting send or decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRpc {
    pub kind: RpcKind,
    pub payload: Vec<u8>,
}

/// Builder for [`RpcRegistry`].
#[derive(Debug, Default)]
pub struct RpcRegistryBuilder {
    names: Vec<&'static str>,
}

impl RpcRegistryBuilder {
    #[must_use]
    pub fn register<R: Rpc>(mut self) -> Self {
        self.names.push(R::NAME);
        self
    }

    pub fn build(mut self) -> RpcResult<RpcRegistry> {
        self.names.sort_unstable();
        if let Some(pair) = self.names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(RpcError::DuplicateName { name: pair[0] });
        }
        let max = usize::from(u16::MAX);
        if self.names.len() > max {
            return Err(RpcError::TooManyTypes {
                count: self.names.len(),
                max,
            });
        }

        let mut hasher = Hasher::new();
        hasher.update(&(self.names.len() as u64).to_le_bytes());
        for name in &self.names {
            hasher.update(&(name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[0..8]);

        let ids = self
            .names
            .iter()
            .enumerate()
            .map(|(index, name)| (*name, RpcKind(index as u16)))
            .collect();
        Ok(RpcRegistry {
            names: self.names,
            ids,
            hash: u64::from_le_bytes(bytes),
        })
    }
}

/// Registered rpc types with stable ids.
#[derive(Debug, Clone)]
pub struct RpcRegistry {
    names: Vec<&'static str>,
    ids: HashMap<&'static str, RpcKind>,
    hash: u64,
}

impl RpcRegistry {
    #[must_use]
    pub fn builder() -> RpcRegistryBuilder {
        RpcRegistryBuilder::default()
    }

    /// Compatibility hash, carried in every rpc packet header.
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn kind_of<R: Rpc>(&self) -> RpcResult<RpcKind> {
        self.ids
            .get(R::NAME)
            .copied()
            .ok_or(RpcError::Unregistered { name: R::NAME })
    }

    #[must_use]
    pub fn name(&self, kind: RpcKind) -> Option<&'static str> {
        self.names.get(usize::from(kind.0)).copied()
    }

    pub fn encode<R: Rpc>(&self, rpc: &R) -> RpcResult<RawRpc> {
        let kind = self.kind_of::<R>()?;
        let mut writer = BitWriter::new();
        rpc.write(&mut writer)?;
        Ok(RawRpc {
            kind,
            payload: writer.finish(),
        })
    }

    /// Decodes `raw` as `R`. Returns `None` when `raw` is a different type.
    pub fn decode<R: Rpc>(&self, raw: &RawRpc) -> RpcResult<Option<R>> {
        if raw.kind != self.kind_of::<R>()? {
            return Ok(None);
        }
        Ok(Some(R::read(&mut BitReader::new(&raw.payload))?))
    }
}
