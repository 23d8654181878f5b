//! Card operations behind the authorization gate

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::gate::{authorize, Action};
use crate::auth::token::AuthClaims;
use crate::crypto;
use crate::error::{Error, Result};
use crate::ledger::LedgerEngine;
use crate::models::cards::{Card, CardStatus};
use crate::models::users::User;
use crate::state::AppState;

/// What a caller sees of a card: the PAN only ever masked, decrypted and
/// reduced to its last four digits at read time.
#[derive(Debug, Clone, Serialize)]
pub struct CardView {
    pub id: Uuid,
    pub masked_number: String,
    pub status: CardStatus,
    pub balance: Decimal,
    pub owner_id: Uuid,
    pub owner_username: String,
}

/// Card service facade: gate check first, then the engine.
pub struct CardService {
    state: Arc<AppState>,
    engine: LedgerEngine,
}

impl CardService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            engine: LedgerEngine::new(state.clone()),
            state,
        }
    }

    /// Direct engine access for embedding code that runs outside the gate,
    /// e.g. the scheduler driving the expiry sweep.
    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    /// ADMIN: issue a card for a user.
    pub fn create_card(
        &self,
        claims: &AuthClaims,
        owner_id: Uuid,
        plain_pan: &str,
    ) -> Result<CardView> {
        authorize(claims, Action::CreateCard)?;
        let card = self.engine.create_card(owner_id, plain_pan)?;
        self.view(&card)
    }

    /// USER: the caller's own cards.
    pub fn my_cards(&self, claims: &AuthClaims) -> Result<Vec<CardView>> {
        authorize(claims, Action::ListOwnCards)?;
        let caller = self.caller(claims)?;
        self.views(self.engine.list_for_owner(caller.id)?)
    }

    /// Cards of a specific user.
    pub fn cards_of_user(&self, claims: &AuthClaims, user_id: Uuid) -> Result<Vec<CardView>> {
        authorize(claims, Action::ListUserCards)?;
        self.views(self.engine.list_for_owner(user_id)?)
    }

    /// ADMIN: page through all cards, optionally filtered by status name.
    pub fn list_all(
        &self,
        claims: &AuthClaims,
        status: Option<&str>,
        page: usize,
        size: usize,
    ) -> Result<Vec<CardView>> {
        authorize(claims, Action::ListAllCards)?;
        let status = status.map(str::parse::<CardStatus>).transpose()?;
        self.views(self.engine.list_paged(status, page, size)?)
    }

    /// USER: credit a card.
    pub fn deposit(
        &self,
        claims: &AuthClaims,
        card_id: Uuid,
        amount: Decimal,
    ) -> Result<CardView> {
        authorize(claims, Action::Deposit)?;
        let card = self.engine.deposit(card_id, amount)?;
        self.view(&card)
    }

    /// USER: move funds between two of the caller's own cards.
    pub fn transfer(
        &self,
        claims: &AuthClaims,
        from_id: Uuid,
        to_id: Uuid,
        amount: Decimal,
    ) -> Result<(CardView, CardView)> {
        authorize(claims, Action::Transfer)?;
        let (from, to) = self.engine.transfer(from_id, to_id, amount)?;
        Ok((self.view(&from)?, self.view(&to)?))
    }

    /// USER: ask for one of the caller's own cards to be blocked.
    pub fn request_block(&self, claims: &AuthClaims, card_id: Uuid) -> Result<CardView> {
        authorize(claims, Action::RequestBlock)?;
        let caller = self.caller(claims)?;
        let card = self.engine.request_block(card_id, caller.id)?;
        self.view(&card)
    }

    /// ADMIN: block a card.
    pub fn block_card(&self, claims: &AuthClaims, card_id: Uuid) -> Result<CardView> {
        authorize(claims, Action::BlockCard)?;
        let card = self.engine.block_card(card_id)?;
        self.view(&card)
    }

    /// ADMIN: re-activate a blocked card.
    pub fn activate_card(&self, claims: &AuthClaims, card_id: Uuid) -> Result<CardView> {
        authorize(claims, Action::ActivateCard)?;
        let card = self.engine.activate_card(card_id)?;
        self.view(&card)
    }

    /// Remove a card permanently.
    pub fn delete_card(&self, claims: &AuthClaims, card_id: Uuid) -> Result<()> {
        authorize(claims, Action::DeleteCard)?;
        self.engine.delete_card(card_id)
    }

    /// Current balance of a card.
    pub fn balance(&self, claims: &AuthClaims, card_id: Uuid) -> Result<Decimal> {
        authorize(claims, Action::GetBalance)?;
        self.engine.get_balance(card_id)
    }

    fn caller(&self, claims: &AuthClaims) -> Result<User> {
        self.state
            .users
            .get_by_username(&claims.subject)?
            .ok_or_else(|| Error::not_found("user", &claims.subject))
    }

    fn view(&self, card: &Card) -> Result<CardView> {
        let pan = self.state.pan_cipher.decrypt(&card.encrypted_number)?;
        let owner = self
            .state
            .users
            .get(card.owner_id)?
            .ok_or_else(|| Error::not_found("user", card.owner_id))?;
        Ok(CardView {
            id: card.id,
            masked_number: crypto::mask_pan(&pan),
            status: card.status,
            balance: card.balance,
            owner_id: card.owner_id,
            owner_username: owner.username,
        })
    }

    fn views(&self, cards: Vec<Card>) -> Result<Vec<CardView>> {
        cards.iter().map(|card| self.view(card)).collect()
    }
}
