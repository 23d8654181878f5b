//! Ledger operations over the card store
//!
//! Every read-check-write runs as an optimistic loop: load a snapshot, apply
//! the change, commit with a version check, reload and retry if another
//! writer won the race. Domain failures (bad amount, wrong status, missing
//! card, insufficient funds) abort immediately; only version clashes retry.
//! A transfer commits both legs through
//! [`update_pair`](crate::models::cards::CardStore::update_pair), lower card
//! id first, so opposing transfers over the same pair cannot deadlock and no
//! observer sees a half-applied move.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::auth::gate::ensure_owner;
use crate::error::{Error, Result};
use crate::models::cards::{Card, CardEvent, CardStatus};
use crate::state::AppState;

/// Bound on version-clash retries before surfacing `Conflict` to the caller.
const MAX_UPDATE_ATTEMPTS: usize = 64;

/// Executes balance and lifecycle operations against the stores.
///
/// The engine performs no authorization; the service layer queries the gate
/// before calling in.
#[derive(Clone)]
pub struct LedgerEngine {
    state: Arc<AppState>,
}

impl LedgerEngine {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Create a card for an existing owner. The PAN is sealed before it is
    /// stored; the card starts ACTIVE with a zero balance and expires three
    /// years from today.
    pub fn create_card(&self, owner_id: Uuid, plain_pan: &str) -> Result<Card> {
        if plain_pan.is_empty() {
            return Err(Error::Validation(
                "card number must not be empty".to_string(),
            ));
        }
        self.state
            .users
            .get(owner_id)?
            .ok_or_else(|| Error::not_found("user", owner_id))?;

        let encrypted = self.state.pan_cipher.encrypt(plain_pan)?;
        let card = self
            .state
            .cards
            .insert(Card::new(owner_id, encrypted, Utc::now().date_naive()))?;
        info!(card_id = %card.id, owner_id = %owner_id, "card created");
        Ok(card)
    }

    /// Credit an ACTIVE card. Returns the updated snapshot.
    pub fn deposit(&self, card_id: Uuid, amount: Decimal) -> Result<Card> {
        ensure_positive(amount)?;
        let card = self.mutate_card(card_id, |card| card.credit(amount))?;
        info!(card_id = %card.id, %amount, "deposit applied");
        Ok(card)
    }

    /// Move funds between two ACTIVE cards of the same owner.
    ///
    /// Both legs commit atomically or not at all. Cross-owner transfers are
    /// categorically forbidden, whatever the caller's role; self-transfers
    /// are rejected before any balance is read.
    pub fn transfer(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        amount: Decimal,
    ) -> Result<(Card, Card)> {
        ensure_positive(amount)?;
        if from_id == to_id {
            return Err(Error::Validation(
                "source and target card must differ".to_string(),
            ));
        }

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let mut from = self
                .state
                .cards
                .get(from_id)?
                .ok_or_else(|| Error::not_found("source card", from_id))?;
            let mut to = self
                .state
                .cards
                .get(to_id)?
                .ok_or_else(|| Error::not_found("target card", to_id))?;

            if from.owner_id != to.owner_id {
                return Err(Error::Forbidden(
                    "transfers are only allowed between cards of the same owner".to_string(),
                ));
            }

            from.debit(amount)?;
            to.credit(amount)?;

            // Commit lower id first; a SQL backend locks rows in that order
            let result = if from.id < to.id {
                self.state.cards.update_pair(from, to)
            } else {
                self.state
                    .cards
                    .update_pair(to, from)
                    .map(|(second, first)| (first, second))
            };

            match result {
                Ok((from, to)) => {
                    info!(
                        from_card = %from.id,
                        to_card = %to.id,
                        %amount,
                        "transfer applied"
                    );
                    return Ok((from, to));
                }
                // Lost the version race; reload both snapshots and retry
                Err(Error::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(
            "transfer retry budget exhausted under contention".to_string(),
        ))
    }

    /// Owner-requested block: ACTIVE → BLOCK_REQUESTED, owner only.
    pub fn request_block(&self, card_id: Uuid, caller_id: Uuid) -> Result<Card> {
        let card = self.mutate_card(card_id, |card| {
            // Ownership is the second gate, layered above the role check
            ensure_owner(caller_id, card.owner_id, "card")?;
            card.apply(CardEvent::RequestBlock)
        })?;
        info!(card_id = %card.id, "block requested");
        Ok(card)
    }

    /// Administrative block: ACTIVE or BLOCK_REQUESTED → BLOCKED.
    pub fn block_card(&self, card_id: Uuid) -> Result<Card> {
        let card = self.mutate_card(card_id, |card| card.apply(CardEvent::Block))?;
        info!(card_id = %card.id, "card blocked");
        Ok(card)
    }

    /// Administrative unblock: BLOCKED → ACTIVE.
    pub fn activate_card(&self, card_id: Uuid) -> Result<Card> {
        let card = self.mutate_card(card_id, |card| card.apply(CardEvent::Activate))?;
        info!(card_id = %card.id, "card activated");
        Ok(card)
    }

    /// Current balance of a card.
    pub fn get_balance(&self, card_id: Uuid) -> Result<Decimal> {
        Ok(self.get_card(card_id)?.balance)
    }

    /// Fetch a card or fail with `NotFound`.
    pub fn get_card(&self, card_id: Uuid) -> Result<Card> {
        self.state
            .cards
            .get(card_id)?
            .ok_or_else(|| Error::not_found("card", card_id))
    }

    /// All cards of an existing owner.
    pub fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Card>> {
        self.state
            .users
            .get(owner_id)?
            .ok_or_else(|| Error::not_found("user", owner_id))?;
        self.state.cards.list_by_owner(owner_id)
    }

    /// Page through all cards, optionally filtered by status.
    pub fn list_paged(
        &self,
        status: Option<CardStatus>,
        page: usize,
        size: usize,
    ) -> Result<Vec<Card>> {
        if size == 0 {
            return Err(Error::Validation("page size must be at least 1".to_string()));
        }
        self.state.cards.list_paged(status, page, size)
    }

    /// Hard-delete a card.
    pub fn delete_card(&self, card_id: Uuid) -> Result<()> {
        self.state.cards.delete(card_id)?;
        info!(card_id = %card_id, "card deleted");
        Ok(())
    }

    /// Expire every ACTIVE card whose expiration date has passed, using
    /// today's UTC date. The periodic trigger lives outside the core.
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_on(Utc::now().date_naive())
    }

    /// Expiry sweep against an explicit date.
    ///
    /// Only ACTIVE cards are eligible; BLOCKED and BLOCK_REQUESTED cards are
    /// left alone even when past their date. Re-running after a full pass is
    /// a no-op.
    pub fn sweep_expired_on(&self, today: NaiveDate) -> Result<usize> {
        let mut expired = 0;
        for snapshot in self.state.cards.list_all()? {
            if !eligible_for_expiry(&snapshot, today) {
                continue;
            }
            if self.expire_card(snapshot, today)? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(count = expired, "expired cards swept");
        }
        Ok(expired)
    }

    /// Expire one card, tolerating concurrent writers. Returns whether this
    /// call performed the transition.
    fn expire_card(&self, mut card: Card, today: NaiveDate) -> Result<bool> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            if !eligible_for_expiry(&card, today) {
                return Ok(false);
            }
            let mut updated = card.clone();
            updated.apply(CardEvent::Expire)?;
            match self.state.cards.update(updated) {
                Ok(_) => return Ok(true),
                Err(Error::Conflict(_)) => match self.state.cards.get(card.id)? {
                    Some(reloaded) => card = reloaded,
                    None => return Ok(false),
                },
                // Deleted between snapshot and commit
                Err(Error::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(
            "expiry retry budget exhausted under contention".to_string(),
        ))
    }

    /// Optimistic single-card read-modify-write.
    fn mutate_card<F>(&self, card_id: Uuid, op: F) -> Result<Card>
    where
        F: Fn(&mut Card) -> Result<()>,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let mut card = self.get_card(card_id)?;
            op(&mut card)?;
            match self.state.cards.update(card) {
                Ok(saved) => return Ok(saved),
                // Lost the version race; reload and retry
                Err(Error::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(
            "update retry budget exhausted under contention".to_string(),
        ))
    }
}

fn eligible_for_expiry(card: &Card, today: NaiveDate) -> bool {
    card.status == CardStatus::Active && card.is_expired_as_of(today)
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
