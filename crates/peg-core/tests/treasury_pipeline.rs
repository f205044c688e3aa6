//! End-to-end treasury scenarios against the in-memory ledger:
//! build -> user signs -> submit -> check balances and the peg.

use std::sync::Arc;
use std::time::Duration;

use peg_core::*;
use peg_keys::Keypair;
use peg_sol::Pubkey;

const RESERVE: Pubkey = Pubkey::new_from_array([0xa1; 32]);
const PEGGED: Pubkey = Pubkey::new_from_array([0xb2; 32]);

fn amount(s: &str) -> DecimalAmount {
    s.parse().unwrap()
}

fn config() -> TreasuryConfig {
    TreasuryConfig::new(
        TokenConfig {
            mint: RESERVE,
            decimals: 6,
        },
        TokenConfig {
            mint: PEGGED,
            decimals: 9,
        },
    )
}

fn ledger_for(authority: &Pubkey) -> Arc<MemoryLedger> {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.create_mint(RESERVE, 6, None);
    ledger.create_mint(PEGGED, 9, Some(*authority));
    ledger
}

async fn setup_with(config: TreasuryConfig) -> (Arc<MemoryLedger>, ConversionEngine) {
    let authority = TreasuryAuthority::from_keypair(Keypair::generate());
    let ledger = ledger_for(&authority.pubkey());
    let engine = ConversionEngine::new(config, ledger.clone(), authority)
        .await
        .unwrap();
    (ledger, engine)
}

async fn setup() -> (Arc<MemoryLedger>, ConversionEngine) {
    setup_with(config()).await
}

/// A user holding `reserve_atomic` reserve tokens.
fn funded_user(ledger: &MemoryLedger, reserve_atomic: u64) -> Keypair {
    let user = Keypair::generate();
    ledger.issue(&RESERVE, &user.pubkey(), reserve_atomic).unwrap();
    user
}

async fn sign_and_submit(
    engine: &ConversionEngine,
    mut conversion: ConversionBundle,
    user: &Keypair,
) -> Result<Receipt> {
    conversion.sign_with(user)?;
    engine.submit(&conversion).await
}

async fn withdraw_and_submit(
    engine: &ConversionEngine,
    user: &Keypair,
    value: &str,
) -> Result<Receipt> {
    let conversion = engine.withdraw(&user.pubkey(), &amount(value), None).await?;
    sign_and_submit(engine, conversion, user).await
}

// ─── Deposits ──────────────────────────────────────────────────────

#[tokio::test]
async fn deposit_mints_pegged_against_reserve() {
    let (ledger, engine) = setup().await;
    let user = funded_user(&ledger, 10_000_000);

    let conversion = engine.deposit(&user.pubkey(), &amount("1.5"), None).await.unwrap();
    assert_eq!(conversion.reserve_atomic, 1_500_000);
    assert_eq!(conversion.pegged_atomic, 1_500_000_000);

    let receipt = sign_and_submit(&engine, conversion, &user).await.unwrap();
    assert!(!receipt.signature.is_empty());

    assert_eq!(engine.reserve_balance().await.unwrap(), 1_500_000);
    assert_eq!(engine.user_balance(&RESERVE, &user.pubkey()).await.unwrap(), 8_500_000);
    assert_eq!(engine.user_balance(&PEGGED, &user.pubkey()).await.unwrap(), 1_500_000_000);
    assert!(engine.check_peg_invariant().await.unwrap());
}

#[tokio::test]
async fn deposit_rejects_non_positive_amounts() {
    let (ledger, engine) = setup().await;
    let user = funded_user(&ledger, 10_000_000);

    for bad in ["-5", "0"] {
        let err = engine.deposit(&user.pubkey(), &amount(bad), None).await.unwrap_err();
        assert!(matches!(err, TreasuryError::InvalidAmount(_)), "{bad}");
    }
}

#[tokio::test]
async fn repeated_deposits_do_not_recreate_accounts() {
    let (ledger, engine) = setup().await;
    let user = funded_user(&ledger, 10_000_000);

    // First build creates the user's pegged account.
    let before = ledger.confirmed_count();
    engine.deposit(&user.pubkey(), &amount("1"), None).await.unwrap();
    assert_eq!(ledger.confirmed_count(), before + 1);

    // A retried request resolves the same accounts and creates nothing.
    let retry = engine.deposit(&user.pubkey(), &amount("1"), None).await.unwrap();
    assert_eq!(ledger.confirmed_count(), before + 1);

    let pegged_account = AccountResolver::derive(&PEGGED, &user.pubkey()).unwrap();
    assert!(retry.bundle.instructions()[1]
        .accounts
        .iter()
        .any(|meta| meta.pubkey == pegged_account));
}

#[tokio::test]
async fn concurrent_deposits_for_a_new_user_create_accounts_once() {
    let (ledger, engine) = setup().await;
    let user = funded_user(&ledger, 10_000_000);
    let before = ledger.confirmed_count();

    let user_pubkey = user.pubkey();
    let (amount_a, amount_b) = (amount("1"), amount("2"));
    let (a, b) = tokio::join!(
        engine.deposit(&user_pubkey, &amount_a, None),
        engine.deposit(&user_pubkey, &amount_b, None),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(ledger.confirmed_count(), before + 1);
}

// ─── Withdrawals ───────────────────────────────────────────────────

#[tokio::test]
async fn deposit_then_withdraw_restores_the_peg() {
    let (ledger, engine) = setup().await;
    let user = funded_user(&ledger, 10_000_000);

    let deposit = engine.deposit(&user.pubkey(), &amount("4.25"), None).await.unwrap();
    sign_and_submit(&engine, deposit, &user).await.unwrap();

    let withdraw = engine.withdraw(&user.pubkey(), &amount("4.25"), None).await.unwrap();
    assert_eq!(withdraw.pegged_atomic, 4_250_000_000);
    assert_eq!(withdraw.reserve_atomic, 4_250_000);
    sign_and_submit(&engine, withdraw, &user).await.unwrap();

    assert_eq!(engine.user_balance(&RESERVE, &user.pubkey()).await.unwrap(), 10_000_000);
    assert_eq!(engine.user_balance(&PEGGED, &user.pubkey()).await.unwrap(), 0);
    assert_eq!(engine.reserve_balance().await.unwrap(), 0);
    assert_eq!(ledger.mint(&PEGGED).unwrap().supply, 0);

    let report = engine.audit().await.unwrap();
    assert!(report.is_balanced());
}

#[tokio::test]
async fn withdraw_fails_when_the_vault_cannot_back_it() {
    let (ledger, engine) = setup().await;

    // Vault holds 100 reserve atomic units.
    let depositor = funded_user(&ledger, 1_000);
    let deposit = engine.deposit(&depositor.pubkey(), &amount("0.0001"), None).await.unwrap();
    sign_and_submit(&engine, deposit, &depositor).await.unwrap();
    assert_eq!(engine.reserve_balance().await.unwrap(), 100);

    // Someone holds 150,000 pegged atomic units the vault never backed.
    let holder = Keypair::generate();
    ledger.issue(&PEGGED, &holder.pubkey(), 150_000).unwrap();

    let err = engine
        .withdraw(&holder.pubkey(), &amount("0.00015"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TreasuryError::Undercollateralized {
            required: 150,
            available: 100
        }
    ));
}

#[tokio::test]
async fn withdraw_needs_pegged_balance() {
    let (ledger, engine) = setup().await;
    let user = funded_user(&ledger, 10_000_000);
    let deposit = engine.deposit(&user.pubkey(), &amount("1"), None).await.unwrap();
    sign_and_submit(&engine, deposit, &user).await.unwrap();

    let err = engine.withdraw(&user.pubkey(), &amount("2"), None).await.unwrap_err();
    assert!(matches!(
        err,
        TreasuryError::InsufficientBalance {
            required: 2_000_000_000,
            available: 1_000_000_000,
            ..
        }
    ));
}

#[tokio::test]
async fn stale_withdrawal_is_caught_at_submission() {
    let (ledger, engine) = setup().await;

    let depositor = funded_user(&ledger, 10_000_000);
    let deposit = engine.deposit(&depositor.pubkey(), &amount("10"), None).await.unwrap();
    sign_and_submit(&engine, deposit, &depositor).await.unwrap();

    // An unbacked holder competes for the same reserve.
    let holder = Keypair::generate();
    ledger.issue(&PEGGED, &holder.pubkey(), 10_000_000_000).unwrap();

    // Both pass the solvency check while the vault still holds 10.
    let first = engine.withdraw(&depositor.pubkey(), &amount("10"), None).await.unwrap();
    let second = engine.withdraw(&holder.pubkey(), &amount("10"), None).await.unwrap();

    sign_and_submit(&engine, first, &depositor).await.unwrap();
    let confirmed = ledger.confirmed_count();

    let err = sign_and_submit(&engine, second, &holder).await.unwrap_err();
    assert!(matches!(
        err,
        TreasuryError::Undercollateralized {
            required: 10_000_000,
            available: 0
        }
    ));
    assert_eq!(ledger.confirmed_count(), confirmed, "nothing submitted");
}

#[tokio::test]
async fn racing_withdrawals_cannot_overdraw_the_vault() {
    let (ledger, engine) = setup().await;

    let depositor = funded_user(&ledger, 10_000_000);
    let deposit = engine.deposit(&depositor.pubkey(), &amount("10"), None).await.unwrap();
    sign_and_submit(&engine, deposit, &depositor).await.unwrap();

    let holder = Keypair::generate();
    ledger.issue(&PEGGED, &holder.pubkey(), 10_000_000_000).unwrap();
    // Both reserve accounts exist up front so neither side creates one mid-race.
    ledger.issue(&RESERVE, &holder.pubkey(), 0).unwrap();
    let before = ledger.confirmed_count();

    let (a, b) = tokio::join!(
        withdraw_and_submit(&engine, &depositor, "10"),
        withdraw_and_submit(&engine, &holder, "10"),
    );

    let outcomes = [a, b];
    let confirmed = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(confirmed, 1, "{outcomes:?}");
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(TreasuryError::Undercollateralized {
            required: 10_000_000,
            available: 0
        })
    )));
    assert_eq!(ledger.confirmed_count(), before + 1);
    assert_eq!(engine.reserve_balance().await.unwrap(), 0);
}

#[tokio::test]
async fn execute_dispatches_on_direction() {
    let (ledger, engine) = setup().await;
    let user = funded_user(&ledger, 10_000_000);

    let request = ConversionRequest::deposit(user.pubkey(), amount("3"));
    let deposit = engine.execute(&request).await.unwrap();
    assert_eq!(deposit.direction, Direction::Deposit);
    sign_and_submit(&engine, deposit, &user).await.unwrap();

    let request = ConversionRequest::withdraw(user.pubkey(), amount("3"));
    let withdraw = engine.execute(&request).await.unwrap();
    assert_eq!(withdraw.direction, Direction::Withdraw);
    assert_eq!(withdraw.signers, vec![engine.authority().pubkey()]);
}

// ─── Invariant ─────────────────────────────────────────────────────

#[tokio::test]
async fn external_mint_breaks_the_peg_and_balanced_deposits_keep_it() {
    let (ledger, engine) = setup().await;
    let alice = funded_user(&ledger, 50_000_000);
    let bob = funded_user(&ledger, 50_000_000);

    for (user, value) in [(&alice, "12.5"), (&bob, "0.000001"), (&alice, "7")] {
        let deposit = engine.deposit(&user.pubkey(), &amount(value), None).await.unwrap();
        sign_and_submit(&engine, deposit, user).await.unwrap();
    }
    assert!(engine.check_peg_invariant().await.unwrap());

    ledger.issue(&PEGGED, &Keypair::generate().pubkey(), 1).unwrap();
    assert!(!engine.check_peg_invariant().await.unwrap());
    assert_eq!(engine.audit().await.unwrap().unbacked(), 1);
}

// ─── Ledger faults ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn slow_ledger_times_out() {
    let mut config = config();
    config.ledger_timeout_ms = 50;
    let (ledger, engine) = setup_with(config).await;
    let user = funded_user(&ledger, 10_000_000);

    ledger.set_latency(Duration::from_secs(2));
    assert!(matches!(
        engine.reserve_balance().await,
        Err(TreasuryError::LedgerTimeout(d)) if d == Duration::from_millis(50)
    ));
    assert!(matches!(
        engine.deposit(&user.pubkey(), &amount("1"), None).await,
        Err(TreasuryError::LedgerTimeout(_))
    ));
}

#[tokio::test]
async fn unavailable_ledger_is_surfaced() {
    let (ledger, engine) = setup().await;
    let user = funded_user(&ledger, 10_000_000);

    ledger.set_unavailable(true);
    assert!(matches!(
        engine.deposit(&user.pubkey(), &amount("1"), None).await,
        Err(TreasuryError::LedgerUnavailable(_))
    ));

    ledger.set_unavailable(false);
    assert!(engine.deposit(&user.pubkey(), &amount("1"), None).await.is_ok());
}

// ─── Startup ───────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_reuses_the_persisted_authority() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = dir.path().join("keys").join("treasury.json");

    let key = Keypair::generate();
    peg_keys::persist_new(&keystore, &key).unwrap();
    let ledger = ledger_for(&key.pubkey());

    let mut config = config();
    config.keystore_path = keystore.clone();

    let engine = ConversionEngine::initialize(config.clone(), ledger.clone())
        .await
        .unwrap();
    assert_eq!(engine.authority().pubkey(), key.pubkey());
    let vault = *engine.vault().address();
    drop(engine);

    // A restart sees the same identity and therefore the same vault.
    let restarted = ConversionEngine::initialize(config, ledger).await.unwrap();
    assert_eq!(restarted.authority().pubkey(), key.pubkey());
    assert_eq!(*restarted.vault().address(), vault);
}

#[tokio::test]
async fn initialize_rejects_bad_precision_before_touching_the_keystore() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = dir.path().join("treasury.json");

    let mut config = config();
    config.keystore_path = keystore.clone();
    config.reserve.decimals = 9;
    config.pegged.decimals = 6;

    let ledger = Arc::new(MemoryLedger::new());
    let err = ConversionEngine::initialize(config, ledger).await.err().unwrap();
    assert!(matches!(err, TreasuryError::UnsupportedPrecision { .. }));
    assert!(!keystore.exists());
}
