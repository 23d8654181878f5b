//! Ledger integration tests: card lifecycle, deposits, transfers, sweep

use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use card_ledger::auth::password::BcryptVerifier;
use card_ledger::auth::token::AuthClaims;
use card_ledger::config::AppConfig;
use card_ledger::error::Error;
use card_ledger::models::cards::{CardStatus, InMemoryCardStore};
use card_ledger::models::users::{InMemoryUserStore, Role, User};
use card_ledger::services::{CardService, UserService};
use card_ledger::state::AppState;

const PAN_A: &str = "4111111111111234";
const PAN_B: &str = "4111111111115678";
const PAN_C: &str = "5500000000000004";

struct TestBed {
    state: Arc<AppState>,
    cards: CardService,
    users: UserService,
    alice: User,
    bob: User,
}

fn setup() -> TestBed {
    let state = Arc::new(AppState::with_collaborators(
        AppConfig::new("integration-test-secret", [42u8; 32]),
        Arc::new(InMemoryUserStore::new()),
        Arc::new(InMemoryCardStore::new()),
        Arc::new(BcryptVerifier::with_cost(4)),
    ));
    let alice = state
        .users
        .insert(User::new("alice", "opaque-hash".into(), Role::User))
        .unwrap();
    let bob = state
        .users
        .insert(User::new("bob", "opaque-hash".into(), Role::User))
        .unwrap();
    state
        .users
        .insert(User::new("root", "opaque-hash".into(), Role::Admin))
        .unwrap();

    TestBed {
        cards: CardService::new(state.clone()),
        users: UserService::new(state.clone()),
        state,
        alice,
        bob,
    }
}

fn admin() -> AuthClaims {
    AuthClaims {
        subject: "root".to_string(),
        role: Role::Admin,
    }
}

fn as_user(username: &str) -> AuthClaims {
    AuthClaims {
        subject: username.to_string(),
        role: Role::User,
    }
}

fn money(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap()
}

#[test]
fn created_card_is_active_masked_and_decryptable() {
    let bed = setup();
    let view = bed
        .cards
        .create_card(&admin(), bed.alice.id, PAN_A)
        .unwrap();

    assert_eq!(view.status, CardStatus::Active);
    assert_eq!(view.balance, Decimal::ZERO);
    assert_eq!(view.masked_number, "**** **** **** 1234");
    assert_eq!(view.owner_username, "alice");

    // The stored ciphertext is not the PAN, but decrypts back to it
    let stored = bed.state.cards.get(view.id).unwrap().unwrap();
    assert_ne!(stored.encrypted_number, PAN_A);
    assert_eq!(
        bed.state.pan_cipher.decrypt(&stored.encrypted_number).unwrap(),
        PAN_A
    );
}

#[test]
fn create_card_requires_an_existing_owner_and_a_pan() {
    let bed = setup();
    let nobody = uuid::Uuid::new_v4();
    assert!(matches!(
        bed.cards.create_card(&admin(), nobody, PAN_A),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        bed.cards.create_card(&admin(), bed.alice.id, ""),
        Err(Error::Validation(_))
    ));
}

#[test]
fn duplicate_pan_is_rejected() {
    let bed = setup();
    bed.cards.create_card(&admin(), bed.alice.id, PAN_A).unwrap();
    assert!(matches!(
        bed.cards.create_card(&admin(), bed.bob.id, PAN_A),
        Err(Error::Conflict(_))
    ));
}

#[test]
fn deposit_increases_the_balance() {
    let bed = setup();
    let card = bed.cards.create_card(&admin(), bed.alice.id, PAN_A).unwrap();

    let after = bed
        .cards
        .deposit(&as_user("alice"), card.id, money("100.00"))
        .unwrap();
    assert_eq!(after.balance, money("100.00"));
}

#[test]
fn deposit_rejects_non_positive_amounts() {
    let bed = setup();
    let card = bed.cards.create_card(&admin(), bed.alice.id, PAN_A).unwrap();

    for bad in ["0", "-5.00"] {
        assert!(matches!(
            bed.cards.deposit(&as_user("alice"), card.id, money(bad)),
            Err(Error::Validation(_))
        ));
    }
}

#[test]
fn deposit_on_a_blocked_card_is_invalid_state() {
    let bed = setup();
    let card = bed.cards.create_card(&admin(), bed.alice.id, PAN_A).unwrap();
    bed.cards.block_card(&admin(), card.id).unwrap();

    assert!(matches!(
        bed.cards.deposit(&as_user("alice"), card.id, money("10.00")),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn transfer_moves_funds_and_conserves_the_total() {
    let bed = setup();
    let engine = bed.cards.engine();
    let a = engine.create_card(bed.alice.id, PAN_A).unwrap();
    let b = engine.create_card(bed.alice.id, PAN_B).unwrap();
    engine.deposit(a.id, money("120.00")).unwrap();
    engine.deposit(b.id, money("10.00")).unwrap();

    let (from, to) = bed
        .cards
        .transfer(&as_user("alice"), a.id, b.id, money("50.00"))
        .unwrap();
    assert_eq!(from.balance, money("70.00"));
    assert_eq!(to.balance, money("60.00"));
    assert_eq!(from.balance + to.balance, money("130.00"));
}

#[test]
fn cross_owner_transfer_is_forbidden_and_mutates_nothing() {
    let bed = setup();
    let engine = bed.cards.engine();
    let a = engine.create_card(bed.alice.id, PAN_A).unwrap();
    let c = engine.create_card(bed.bob.id, PAN_C).unwrap();
    engine.deposit(a.id, money("120.00")).unwrap();

    // The engine itself refuses, independent of any caller role
    assert!(matches!(
        engine.transfer(a.id, c.id, money("50.00")),
        Err(Error::Forbidden(_))
    ));
    assert_eq!(engine.get_balance(a.id).unwrap(), money("120.00"));
    assert_eq!(engine.get_balance(c.id).unwrap(), Decimal::ZERO);
}

#[test]
fn self_transfer_is_rejected() {
    let bed = setup();
    let engine = bed.cards.engine();
    let a = engine.create_card(bed.alice.id, PAN_A).unwrap();
    engine.deposit(a.id, money("120.00")).unwrap();

    assert!(matches!(
        engine.transfer(a.id, a.id, money("10.00")),
        Err(Error::Validation(_))
    ));
    assert_eq!(engine.get_balance(a.id).unwrap(), money("120.00"));
}

#[test]
fn transfer_without_funds_is_a_conflict() {
    let bed = setup();
    let engine = bed.cards.engine();
    let a = engine.create_card(bed.alice.id, PAN_A).unwrap();
    let b = engine.create_card(bed.alice.id, PAN_B).unwrap();
    engine.deposit(a.id, money("49.99")).unwrap();

    assert!(matches!(
        engine.transfer(a.id, b.id, money("50.00")),
        Err(Error::Conflict(_))
    ));
    assert_eq!(engine.get_balance(a.id).unwrap(), money("49.99"));
    assert_eq!(engine.get_balance(b.id).unwrap(), Decimal::ZERO);
}

#[test]
fn transfer_involving_a_non_active_card_is_invalid_state() {
    let bed = setup();
    let engine = bed.cards.engine();
    let a = engine.create_card(bed.alice.id, PAN_A).unwrap();
    let b = engine.create_card(bed.alice.id, PAN_B).unwrap();
    engine.deposit(a.id, money("100.00")).unwrap();
    engine.block_card(b.id).unwrap();

    assert!(matches!(
        engine.transfer(a.id, b.id, money("10.00")),
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(engine.get_balance(a.id).unwrap(), money("100.00"));
}

#[test]
fn request_block_is_owner_only() {
    let bed = setup();
    let card = bed.cards.create_card(&admin(), bed.alice.id, PAN_A).unwrap();

    assert!(matches!(
        bed.cards.request_block(&as_user("bob"), card.id),
        Err(Error::Forbidden(_))
    ));

    let view = bed.cards.request_block(&as_user("alice"), card.id).unwrap();
    assert_eq!(view.status, CardStatus::BlockRequested);

    // Already requested; the state machine refuses a second request
    assert!(matches!(
        bed.cards.request_block(&as_user("alice"), card.id),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn block_and_activate_follow_the_state_machine() {
    let bed = setup();
    let card = bed.cards.create_card(&admin(), bed.alice.id, PAN_A).unwrap();

    // Activating an already-active card is not a legal transition
    assert!(matches!(
        bed.cards.activate_card(&admin(), card.id),
        Err(Error::InvalidState { .. })
    ));

    let blocked = bed.cards.block_card(&admin(), card.id).unwrap();
    assert_eq!(blocked.status, CardStatus::Blocked);

    let active = bed.cards.activate_card(&admin(), card.id).unwrap();
    assert_eq!(active.status, CardStatus::Active);
}

#[test]
fn listing_supports_status_filter_and_paging() {
    let bed = setup();
    let engine = bed.cards.engine();
    for i in 0..4 {
        engine
            .create_card(bed.alice.id, &format!("411111111111{i:04}"))
            .unwrap();
    }
    let blocked = engine.create_card(bed.bob.id, PAN_C).unwrap();
    engine.block_card(blocked.id).unwrap();

    let all = bed.cards.list_all(&admin(), None, 0, 10).unwrap();
    assert_eq!(all.len(), 5);

    let only_blocked = bed
        .cards
        .list_all(&admin(), Some("blocked"), 0, 10)
        .unwrap();
    assert_eq!(only_blocked.len(), 1);
    assert_eq!(only_blocked[0].id, blocked.id);

    let page = bed.cards.list_all(&admin(), None, 1, 2).unwrap();
    assert_eq!(page.len(), 2);

    assert!(matches!(
        bed.cards.list_all(&admin(), Some("melted"), 0, 10),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        bed.cards.list_all(&admin(), None, 0, 0),
        Err(Error::Validation(_))
    ));
}

#[test]
fn deleted_cards_are_gone() {
    let bed = setup();
    let card = bed.cards.create_card(&admin(), bed.alice.id, PAN_A).unwrap();
    bed.cards.delete_card(&as_user("alice"), card.id).unwrap();

    assert!(matches!(
        bed.cards.balance(&as_user("alice"), card.id),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        bed.cards.delete_card(&as_user("alice"), card.id),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn user_deletion_is_refused_while_cards_remain() {
    let bed = setup();
    let card = bed.cards.create_card(&admin(), bed.alice.id, PAN_A).unwrap();

    assert!(matches!(
        bed.users.delete_user(&admin(), bed.alice.id),
        Err(Error::Conflict(_))
    ));

    bed.cards.delete_card(&admin(), card.id).unwrap();
    bed.users.delete_user(&admin(), bed.alice.id).unwrap();
    assert!(matches!(
        bed.users.get_user(&admin(), bed.alice.id),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn sweep_expires_only_overdue_active_cards_and_is_idempotent() {
    let bed = setup();
    let engine = bed.cards.engine();
    let today = Utc::now().date_naive();

    let overdue_active = engine.create_card(bed.alice.id, PAN_A).unwrap();
    let overdue_blocked = engine.create_card(bed.alice.id, PAN_B).unwrap();
    let current = engine.create_card(bed.alice.id, PAN_C).unwrap();
    engine.block_card(overdue_blocked.id).unwrap();

    // Backdate two cards past their expiration
    for id in [overdue_active.id, overdue_blocked.id] {
        let mut card = bed.state.cards.get(id).unwrap().unwrap();
        card.expiration_date = today - Duration::days(1);
        bed.state.cards.update(card).unwrap();
    }

    assert_eq!(engine.sweep_expired_on(today).unwrap(), 1);
    assert_eq!(
        engine.get_card(overdue_active.id).unwrap().status,
        CardStatus::Expired
    );
    // Status precedence: a blocked card stays blocked past its date
    assert_eq!(
        engine.get_card(overdue_blocked.id).unwrap().status,
        CardStatus::Blocked
    );
    assert_eq!(
        engine.get_card(current.id).unwrap().status,
        CardStatus::Active
    );

    // Second pass changes nothing
    assert_eq!(engine.sweep_expired_on(today).unwrap(), 0);
}

#[test]
fn expired_cards_cannot_move_money() {
    let bed = setup();
    let engine = bed.cards.engine();
    let today = Utc::now().date_naive();
    let card = engine.create_card(bed.alice.id, PAN_A).unwrap();

    let mut stored = bed.state.cards.get(card.id).unwrap().unwrap();
    stored.expiration_date = today - Duration::days(1);
    bed.state.cards.update(stored).unwrap();
    engine.sweep_expired_on(today).unwrap();

    assert!(matches!(
        engine.deposit(card.id, money("10.00")),
        Err(Error::InvalidState { .. })
    ));
    // EXPIRED is terminal: not even an admin block applies
    assert!(matches!(
        engine.block_card(card.id),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn concurrent_transfers_drain_the_source_exactly_once() {
    let bed = setup();
    let engine = bed.cards.engine().clone();
    let from = engine.create_card(bed.alice.id, PAN_A).unwrap();
    let to = engine.create_card(bed.alice.id, PAN_B).unwrap();
    engine.deposit(from.id, money("100.00")).unwrap();

    // 8 transfers of 30.00 against a balance of 100.00: exactly 3 can apply
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let (from_id, to_id) = (from.id, to.id);
            thread::spawn(move || engine.transfer(from_id, to_id, money("30.00")))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 3);
    for failed in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(failed, Err(Error::Conflict(_))));
    }

    let from_balance = engine.get_balance(from.id).unwrap();
    let to_balance = engine.get_balance(to.id).unwrap();
    assert_eq!(from_balance, money("10.00"));
    assert_eq!(to_balance, money("90.00"));
    assert!(from_balance >= Decimal::ZERO);
    // Conservation across all interleavings
    assert_eq!(from_balance + to_balance, money("100.00"));
}

#[test]
fn opposing_concurrent_transfers_do_not_deadlock_or_lose_money() {
    let bed = setup();
    let engine = bed.cards.engine().clone();
    let a = engine.create_card(bed.alice.id, PAN_A).unwrap();
    let b = engine.create_card(bed.alice.id, PAN_B).unwrap();
    engine.deposit(a.id, money("500.00")).unwrap();
    engine.deposit(b.id, money("500.00")).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            let (a_id, b_id) = (a.id, b.id);
            thread::spawn(move || {
                if i % 2 == 0 {
                    engine.transfer(a_id, b_id, money("5.00"))
                } else {
                    engine.transfer(b_id, a_id, money("5.00"))
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let total = engine.get_balance(a.id).unwrap() + engine.get_balance(b.id).unwrap();
    assert_eq!(total, money("1000.00"));
}

#[test]
fn concurrent_deposits_all_apply() {
    let bed = setup();
    let engine = bed.cards.engine().clone();
    let card = engine.create_card(bed.alice.id, PAN_A).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            let card_id = card.id;
            thread::spawn(move || engine.deposit(card_id, money("1.00")))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(engine.get_balance(card.id).unwrap(), money("16.00"));
}
