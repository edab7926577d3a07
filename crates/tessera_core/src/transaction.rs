//! Write transaction state machine.

use crate::enumerator::EnumeratorRegistry;
use crate::error::{CoreError, CoreResult};
use tessera_engine::{EngineSession, Schema};

/// State of a handle's write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No write transaction is open.
    #[default]
    Idle,
    /// A write transaction is open.
    InTransaction,
}

/// Drives begin/commit/cancel for one handle.
///
/// The controller owns only the state; the engine session and the
/// enumerator registry are passed in by the handle that holds them.
#[derive(Debug, Default)]
pub struct TransactionController {
    state: TransactionState,
}

impl TransactionController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether a write transaction is open.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.state == TransactionState::InTransaction
    }

    /// Opens a write transaction.
    ///
    /// Live enumerators are frozen to the pre-transaction data first, so
    /// they are not affected by the transaction's writes.
    pub(crate) fn begin(
        &mut self,
        session: &mut dyn EngineSession,
        enumerators: &mut EnumeratorRegistry,
        schema: &Schema,
    ) -> CoreResult<()> {
        if self.is_in_transaction() {
            return Err(CoreError::transaction(
                "a write transaction is already in progress",
            ));
        }
        enumerators.detach_all(session, schema)?;
        session
            .begin_transaction()
            .map_err(|e| CoreError::transaction(e.to_string()))?;
        self.state = TransactionState::InTransaction;
        Ok(())
    }

    /// Commits the open transaction and returns the new version.
    ///
    /// The controller is idle afterwards whether or not the commit succeeded.
    pub(crate) fn commit(&mut self, session: &mut dyn EngineSession) -> CoreResult<u64> {
        if !self.is_in_transaction() {
            return Err(CoreError::transaction("no write transaction in progress"));
        }
        self.state = TransactionState::Idle;
        session
            .commit()
            .map_err(|e| CoreError::transaction(e.to_string()))
    }

    /// Discards the open transaction.
    pub(crate) fn cancel(&mut self, session: &mut dyn EngineSession) -> CoreResult<()> {
        if !self.is_in_transaction() {
            return Err(CoreError::transaction("no write transaction in progress"));
        }
        self.state = TransactionState::Idle;
        session
            .cancel()
            .map_err(|e| CoreError::transaction(e.to_string()))
    }

    /// Cancels an open transaction while the handle closes.
    ///
    /// Returns true if a transaction was rolled back.
    pub(crate) fn abandon(&mut self, session: &mut dyn EngineSession) -> bool {
        if !self.is_in_transaction() {
            return false;
        }
        self.state = TransactionState::Idle;
        // The session is about to be dropped, which also releases its write lock.
        let _ = session.cancel();
        true
    }
}
