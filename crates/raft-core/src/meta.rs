//! # meta
//!
//! why: durable storage of term, vote and configuration so a restarted node never votes twice
//! relations: called synchronously by context.rs; FileMetaStore lives in raft-storage
//! what: MetaStore trait, InMemoryMetaStore

use crate::error::StorageError;
use crate::membership::{Configuration, Endpoint};

/// durable raft metadata of one partition
///
/// every store call must be durable before it returns
pub trait MetaStore: Send {
    fn load_term(&self) -> Result<u64, StorageError>;

    fn load_vote(&self) -> Result<Option<Endpoint>, StorageError>;

    /// persist term and vote together
    fn store_term_and_vote(&mut self, term: u64, vote: Option<&Endpoint>)
        -> Result<(), StorageError>;

    fn store_vote(&mut self, vote: &Endpoint) -> Result<(), StorageError>;

    fn load_configuration(&self) -> Result<Option<Configuration>, StorageError>;

    fn store_configuration(&mut self, configuration: &Configuration) -> Result<(), StorageError>;
}

/// in-memory meta store, no persistence across restarts
#[derive(Debug, Default, Clone)]
pub struct InMemoryMetaStore {
    term: u64,
    vote: Option<Endpoint>,
    configuration: Option<Configuration>,
    /// when set every store call fails, used to exercise fatal persistence paths
    unavailable: bool,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every subsequent store call fail
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable {
            return Err(StorageError::Unavailable("meta store offline".to_string()));
        }
        Ok(())
    }
}

impl MetaStore for InMemoryMetaStore {
    fn load_term(&self) -> Result<u64, StorageError> {
        Ok(self.term)
    }

    fn load_vote(&self) -> Result<Option<Endpoint>, StorageError> {
        Ok(self.vote.clone())
    }

    fn store_term_and_vote(
        &mut self,
        term: u64,
        vote: Option<&Endpoint>,
    ) -> Result<(), StorageError> {
        self.check()?;
        self.term = term;
        self.vote = vote.cloned();
        Ok(())
    }

    fn store_vote(&mut self, vote: &Endpoint) -> Result<(), StorageError> {
        self.check()?;
        self.vote = Some(vote.clone());
        Ok(())
    }

    fn load_configuration(&self) -> Result<Option<Configuration>, StorageError> {
        Ok(self.configuration.clone())
    }

    fn store_configuration(&mut self, configuration: &Configuration) -> Result<(), StorageError> {
        self.check()?;
        self.configuration = Some(configuration.clone());
        Ok(())
    }
}
