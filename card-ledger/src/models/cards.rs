//! Card entities, the status state machine, and the card store
//!
//! A card's balance and status are only ever changed through version-checked
//! updates: [`CardStore::update`] and [`CardStore::update_pair`] compare the
//! caller's version stamp against the stored one and fail with `Conflict` when
//! another writer got there first. The ledger engine retries on that signal.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Card lifetime from issue to expiration.
const CARD_VALIDITY_MONTHS: u32 = 36;

/// Card status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    Active,
    BlockRequested,
    Blocked,
    Expired,
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardStatus::Active => write!(f, "ACTIVE"),
            CardStatus::BlockRequested => write!(f, "BLOCK_REQUESTED"),
            CardStatus::Blocked => write!(f, "BLOCKED"),
            CardStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl FromStr for CardStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(CardStatus::Active),
            "BLOCK_REQUESTED" => Ok(CardStatus::BlockRequested),
            "BLOCKED" => Ok(CardStatus::Blocked),
            "EXPIRED" => Ok(CardStatus::Expired),
            other => Err(Error::Validation(format!("unknown card status: {other}"))),
        }
    }
}

/// Status-changing events.
///
/// | From | Event | To |
/// |---|---|---|
/// | ACTIVE | RequestBlock | BLOCK_REQUESTED |
/// | ACTIVE, BLOCK_REQUESTED | Block | BLOCKED |
/// | BLOCKED | Activate | ACTIVE |
/// | ACTIVE | Expire | EXPIRED |
///
/// EXPIRED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardEvent {
    RequestBlock,
    Block,
    Activate,
    Expire,
}

impl CardEvent {
    /// The status this event moves a card into.
    pub fn target(&self) -> CardStatus {
        match self {
            CardEvent::RequestBlock => CardStatus::BlockRequested,
            CardEvent::Block => CardStatus::Blocked,
            CardEvent::Activate => CardStatus::Active,
            CardEvent::Expire => CardStatus::Expired,
        }
    }
}

impl CardStatus {
    /// Apply an event, returning the next status or `InvalidState` when the
    /// transition is not in the table above.
    pub fn transition(self, event: CardEvent) -> Result<CardStatus> {
        match (self, event) {
            (CardStatus::Active, CardEvent::RequestBlock) => Ok(CardStatus::BlockRequested),
            (CardStatus::Active | CardStatus::BlockRequested, CardEvent::Block) => {
                Ok(CardStatus::Blocked)
            }
            (CardStatus::Blocked, CardEvent::Activate) => Ok(CardStatus::Active),
            (CardStatus::Active, CardEvent::Expire) => Ok(CardStatus::Expired),
            (current, event) => Err(Error::InvalidState {
                current,
                requested: format!("transition to {}", event.target()),
            }),
        }
    }
}

/// Card account entity.
///
/// `encrypted_number` is the AES-sealed PAN; the plaintext never reaches the
/// store. `version` is the optimistic-lock stamp bumped by every committed
/// update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub encrypted_number: String,
    pub expiration_date: NaiveDate,
    pub status: CardStatus,
    pub balance: Decimal,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Create a new active card with zero balance, expiring three years after
    /// the issue date.
    pub fn new(owner_id: Uuid, encrypted_number: String, issued_on: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            encrypted_number,
            expiration_date: issued_on + Months::new(CARD_VALIDITY_MONTHS),
            status: CardStatus::Active,
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fail with `InvalidState` unless the card is ACTIVE.
    pub fn ensure_active(&self, requested: &str) -> Result<()> {
        if self.status == CardStatus::Active {
            Ok(())
        } else {
            Err(Error::InvalidState {
                current: self.status,
                requested: requested.to_string(),
            })
        }
    }

    /// Add funds. The card must be ACTIVE and the amount positive.
    pub fn credit(&mut self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        self.ensure_active("credit funds")?;
        self.balance += amount;
        self.touch();
        Ok(())
    }

    /// Remove funds. The card must be ACTIVE, the amount positive, and the
    /// balance sufficient (the `balance >= 0` invariant is never broken).
    pub fn debit(&mut self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        self.ensure_active("debit funds")?;
        if self.balance < amount {
            return Err(Error::Conflict("insufficient funds".to_string()));
        }
        self.balance -= amount;
        self.touch();
        Ok(())
    }

    /// Run the status state machine.
    pub fn apply(&mut self, event: CardEvent) -> Result<()> {
        self.status = self.status.transition(event)?;
        self.touch();
        Ok(())
    }

    /// Whether the card's expiration date has passed as of `today`.
    pub fn is_expired_as_of(&self, today: NaiveDate) -> bool {
        self.expiration_date < today
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Card store trait for data access.
///
/// Mutations are optimistic: `update` and `update_pair` require the caller's
/// `version` to match the stored row and bump it on commit. Implementations
/// backed by row locks must acquire per-card mutation rights in ascending
/// card-id order; `update_pair` commits both rows atomically so no observer
/// sees a half-applied transfer.
pub trait CardStore: Send + Sync {
    /// Insert a new card. Fails with `Conflict` when the encrypted number is
    /// already registered.
    fn insert(&self, card: Card) -> Result<Card>;

    /// Get card by id.
    fn get(&self, card_id: Uuid) -> Result<Option<Card>>;

    /// Get all cards owned by a user.
    fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Card>>;

    /// Number of cards owned by a user.
    fn count_by_owner(&self, owner_id: Uuid) -> Result<usize>;

    /// All cards, unfiltered. Used by the expiry sweep.
    fn list_all(&self) -> Result<Vec<Card>>;

    /// Page through cards, optionally filtered by status, newest first.
    fn list_paged(
        &self,
        status: Option<CardStatus>,
        page: usize,
        size: usize,
    ) -> Result<Vec<Card>>;

    /// Version-checked single-card update.
    fn update(&self, card: Card) -> Result<Card>;

    /// Version-checked atomic two-card update (the two legs of a transfer).
    fn update_pair(&self, first: Card, second: Card) -> Result<(Card, Card)>;

    /// Hard-delete a card. Fails with `NotFound` if absent.
    fn delete(&self, card_id: Uuid) -> Result<()>;
}

#[derive(Default)]
struct CardTables {
    cards: HashMap<Uuid, Card>,
    by_owner: HashMap<Uuid, Vec<Uuid>>,
    by_number: HashMap<String, Uuid>,
}

impl CardTables {
    /// Version check against the stored row; `Conflict` when stale.
    fn check_version(&self, card: &Card) -> Result<()> {
        let stored = self
            .cards
            .get(&card.id)
            .ok_or_else(|| Error::not_found("card", card.id))?;
        if stored.version != card.version {
            return Err(Error::Conflict(format!(
                "card {} was modified concurrently",
                card.id
            )));
        }
        Ok(())
    }

    fn commit(&mut self, mut card: Card) -> Card {
        card.version += 1;
        self.cards.insert(card.id, card.clone());
        card
    }
}

/// In-memory card store implementation.
///
/// A single lock over all tables makes the pair update trivially atomic; the
/// version stamps keep the contract identical to a row-locked SQL backend.
#[derive(Default)]
pub struct InMemoryCardStore {
    tables: RwLock<CardTables>,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Internal("card store lock poisoned".to_string())
    }
}

impl CardStore for InMemoryCardStore {
    fn insert(&self, card: Card) -> Result<Card> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        if tables.by_number.contains_key(&card.encrypted_number) {
            return Err(Error::Conflict(
                "card number is already registered".to_string(),
            ));
        }
        tables
            .by_number
            .insert(card.encrypted_number.clone(), card.id);
        tables.by_owner.entry(card.owner_id).or_default().push(card.id);
        tables.cards.insert(card.id, card.clone());
        Ok(card)
    }

    fn get(&self, card_id: Uuid) -> Result<Option<Card>> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.cards.get(&card_id).cloned())
    }

    fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Card>> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        let ids = tables.by_owner.get(&owner_id);
        Ok(ids
            .into_iter()
            .flatten()
            .filter_map(|id| tables.cards.get(id).cloned())
            .collect())
    }

    fn count_by_owner(&self, owner_id: Uuid) -> Result<usize> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.by_owner.get(&owner_id).map_or(0, Vec::len))
    }

    fn list_all(&self) -> Result<Vec<Card>> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.cards.values().cloned().collect())
    }

    fn list_paged(
        &self,
        status: Option<CardStatus>,
        page: usize,
        size: usize,
    ) -> Result<Vec<Card>> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        let mut cards: Vec<Card> = tables
            .cards
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        // Newest first, id as tie-breaker for a stable order
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let start = page.saturating_mul(size);
        if start >= cards.len() {
            return Ok(Vec::new());
        }
        let end = (start + size).min(cards.len());
        Ok(cards[start..end].to_vec())
    }

    fn update(&self, card: Card) -> Result<Card> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.check_version(&card)?;
        Ok(tables.commit(card))
    }

    fn update_pair(&self, first: Card, second: Card) -> Result<(Card, Card)> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.check_version(&first)?;
        tables.check_version(&second)?;
        let first = tables.commit(first);
        let second = tables.commit(second);
        Ok((first, second))
    }

    fn delete(&self, card_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        let card = tables
            .cards
            .remove(&card_id)
            .ok_or_else(|| Error::not_found("card", card_id))?;
        tables.by_number.remove(&card.encrypted_number);
        if let Some(ids) = tables.by_owner.get_mut(&card.owner_id) {
            ids.retain(|id| *id != card_id);
        }
        Ok(())
    }
}
