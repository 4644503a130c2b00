use chrono::{DateTime, Duration, TimeZone, Utc};
use contracts::{
    decode_callback, ContestKind, CropKind, GiftKind, PlayerCommand, VipTier, WATER_CAP,
};
use rand::SeedableRng;

use crate::persistence::{self, NewUserProfile};
use crate::{GameService, ServiceError};
use farm_core::contest::SettlementDecision;
use farm_core::error::GameError;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn service_with_users(user_ids: &[i64]) -> GameService {
    let mut service = GameService::open_in_memory(t0()).expect("open service");
    for user_id in user_ids {
        service
            .initialize_user(*user_id, &NewUserProfile::default(), None, t0())
            .expect("bootstrap user");
    }
    service
}

#[test]
fn potato_lifecycle_through_the_store() {
    let mut service = service_with_users(&[1]);

    let due = service.plant(1, 1, CropKind::Potato, t0()).expect("plant");
    assert_eq!(due, t0() + Duration::hours(24));

    let status = service.farm_status(1, t0()).unwrap();
    assert_eq!(status.water, 0);
    assert!(!status.patches[0].ready);

    assert_eq!(service.sweep_crops(due).unwrap(), 1);
    let earnings = service.harvest(1, 1, due).expect("harvest");
    assert_eq!(earnings, 100);

    let after = service.farm_status(1, due).unwrap();
    assert_eq!(after.coins, 100);
    assert!(after.patches[0].crop.is_none());
}

#[test]
fn failed_plant_leaves_no_trace_in_the_store() {
    let mut service = service_with_users(&[1]);
    // Burn the seed on patch 1, then try to plant patch 2 without one.
    service.plant(1, 1, CropKind::Potato, t0()).unwrap();
    let before = persistence::load_ledger(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();

    let result = service.plant(1, 2, CropKind::Potato, t0());
    assert!(matches!(
        result,
        Err(ServiceError::Game(GameError::InsufficientResource(_)))
    ));

    let after = persistence::load_ledger(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
    let patch = persistence::load_patch(service.store_mut().connection(), 1, 2)
        .unwrap()
        .unwrap();
    assert!(patch.is_empty());
}

#[test]
fn banned_users_are_locked_out_of_every_command() {
    let mut service = service_with_users(&[1]);
    service.ban_user(1, "abuse", t0()).unwrap();

    let reply = service.dispatch(1, &PlayerCommand::ClaimDailyWater, t0());
    assert!(reply.contains("banned"), "reply was {reply:?}");

    service.unban_user(1, t0()).unwrap();
    let reply = service.dispatch(1, &PlayerCommand::ClaimDailyWater, t0());
    assert!(reply.contains("Daily reward claimed"), "reply was {reply:?}");
}

#[test]
fn dispatch_covers_decoded_callbacks() {
    let mut service = service_with_users(&[1]);
    let command = decode_callback("plant_potato_1").expect("decodes");
    let reply = service.dispatch(1, &command, t0());
    assert!(reply.contains("potato planted"), "reply was {reply:?}");

    let again = service.dispatch(1, &command, t0());
    assert!(
        again.contains("already has a crop"),
        "reply was {again:?}"
    );
}

#[test]
fn vip_claim_is_idempotent_per_day_through_the_store() {
    let mut service = service_with_users(&[1]);
    service.purchase_vip(1, VipTier::Tier2, 30, t0()).unwrap();

    service.claim_vip_reward(1, t0()).expect("first claim");
    let second = service.claim_vip_reward(1, t0() + Duration::hours(5));
    assert!(matches!(
        second,
        Err(ServiceError::Game(GameError::StateConflict(_)))
    ));

    // Next day works again.
    service
        .claim_vip_reward(1, t0() + Duration::days(1))
        .expect("next-day claim");
}

#[test]
fn settlement_commits_prizes_and_terminal_state_together() {
    let mut service = service_with_users(&[1, 2, 3, 4]);
    let contest_id = service
        .create_scheduled_contest(ContestKind::Weekly, t0())
        .unwrap();

    for user_id in [1, 2, 3, 4] {
        service.join_contest(user_id, contest_id, t0()).unwrap();
    }
    // Only three participants qualify.
    for user_id in [1, 2, 3] {
        for _ in 0..30 {
            service.record_contest_ad(user_id, contest_id, t0()).unwrap();
        }
    }

    let end = t0() + Duration::days(7);
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(5);
    let decision = service
        .settle_contest(contest_id, end, false, &mut rng)
        .unwrap();
    let SettlementDecision::Settled(outcome) = decision else {
        panic!("expected settlement");
    };
    assert_eq!(outcome.winners.len(), 3);

    // Winner balances reflect exactly one prize each.
    let mut paid: Vec<i64> = outcome
        .winners
        .iter()
        .map(|winner| {
            persistence::load_ledger(service.store_mut().connection(), winner.user_id)
                .unwrap()
                .unwrap()
                .coins
        })
        .collect();
    paid.sort_unstable();
    assert_eq!(paid, vec![2000, 3000, 5000]);

    // The unqualified fourth user got nothing.
    let outsider = persistence::load_ledger(service.store_mut().connection(), 4)
        .unwrap()
        .unwrap();
    assert_eq!(outsider.coins, 0);

    // Re-settling is a no-op: same winners, no double credit.
    let second = service
        .settle_contest(contest_id, end, false, &mut rng)
        .unwrap();
    assert_eq!(second, SettlementDecision::AlreadyEnded);
    let winner_coins = persistence::load_ledger(service.store_mut().connection(), outcome.winners[0].user_id)
        .unwrap()
        .unwrap()
        .coins;
    assert_eq!(winner_coins, outcome.winners[0].prize.coins);

    let stored = persistence::load_contest(service.store_mut().connection(), contest_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.winners, outcome.winners);
}

#[test]
fn monthly_prize_grants_vip_time() {
    let mut service = service_with_users(&[1]);
    let contest_id = service
        .create_scheduled_contest(ContestKind::Monthly, t0())
        .unwrap();
    service.join_contest(1, contest_id, t0()).unwrap();
    for _ in 0..100 {
        service.record_contest_ad(1, contest_id, t0()).unwrap();
    }

    let end = t0() + Duration::days(31);
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
    service.settle_contest(contest_id, end, false, &mut rng).unwrap();

    let overview = service.vip_overview(1, end).unwrap();
    assert_eq!(overview.tier, Some(1));
    assert!(overview.can_claim_daily);
}

#[test]
fn referral_bootstrap_credits_the_referrer_with_capped_water() {
    let mut service = service_with_users(&[1]);
    let referrer = persistence::get_user(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();

    // Top the referrer off near the cap first.
    service.gift(1, GiftKind::Water, 88, t0()).unwrap();

    service
        .initialize_user(
            2,
            &NewUserProfile::default(),
            Some(&referrer.referral_code),
            t0(),
        )
        .unwrap();

    let ledger = persistence::load_ledger(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();
    assert_eq!(ledger.water, WATER_CAP.min(10 + 88 + 5));

    let updated = persistence::get_user(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();
    assert_eq!(updated.total_referrals, 1);

    let referred = persistence::get_user(service.store_mut().connection(), 2)
        .unwrap()
        .unwrap();
    assert_eq!(referred.referred_by, Some(1));
}

#[test]
fn initialize_user_is_idempotent() {
    let mut service = service_with_users(&[1]);
    let first = persistence::get_user(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();
    let second = service
        .initialize_user(1, &NewUserProfile::default(), None, t0() + Duration::hours(1))
        .unwrap();
    assert_eq!(first.referral_code, second.referral_code);
    assert_eq!(
        persistence::load_patches(service.store_mut().connection(), 1)
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn expansion_consumes_parts_and_adds_a_patch_row() {
    let mut service = service_with_users(&[1]);
    service.gift(1, GiftKind::Coins, 1000, t0()).unwrap();
    service.buy_parts(1, 10, t0()).unwrap();

    let new_number = service.expand_farm(1, t0()).unwrap();
    assert_eq!(new_number, 4);
    assert_eq!(
        persistence::load_patches(service.store_mut().connection(), 1)
            .unwrap()
            .len(),
        4
    );

    let err = service.expand_farm(1, t0());
    assert!(matches!(
        err,
        Err(ServiceError::Game(GameError::InsufficientResource(_)))
    ));
}

#[test]
fn vip_purchase_flow_activates_only_on_approval() {
    let mut service = service_with_users(&[1]);
    let payment_id = service
        .request_vip_purchase(1, VipTier::Tier2, t0())
        .unwrap();

    assert_eq!(service.vip_overview(1, t0()).unwrap().tier, None);

    service
        .approve_payment(payment_id, Some((VipTier::Tier2, 30)), t0())
        .unwrap();
    assert_eq!(service.vip_overview(1, t0()).unwrap().tier, Some(2));

    // A second approval of the same payment is refused.
    let again = service.approve_payment(payment_id, Some((VipTier::Tier2, 30)), t0());
    assert!(matches!(
        again,
        Err(ServiceError::Game(GameError::StateConflict(_)))
    ));
}

#[test]
fn rejected_payment_grants_nothing() {
    let mut service = service_with_users(&[1]);
    let payment_id = service
        .request_vip_purchase(1, VipTier::Tier4, t0())
        .unwrap();
    service.reject_payment(payment_id, "no funds", t0()).unwrap();
    assert_eq!(service.vip_overview(1, t0()).unwrap().tier, None);

    let late = service.approve_payment(payment_id, None, t0());
    assert!(matches!(
        late,
        Err(ServiceError::Game(GameError::StateConflict(_)))
    ));
}

#[test]
fn withdrawal_escrow_refunds_on_rejection() {
    let mut service = service_with_users(&[1]);
    service.gift(1, GiftKind::Coins, 500, t0()).unwrap();

    let withdrawal_id = service
        .request_withdrawal(1, 400, "USDT", "wallet-1", t0())
        .unwrap();
    let escrowed = persistence::load_ledger(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();
    assert_eq!(escrowed.coins, 100);

    // Too large a second request bounces with no change.
    assert!(matches!(
        service.request_withdrawal(1, 200, "USDT", "wallet-1", t0()),
        Err(ServiceError::Game(GameError::InsufficientResource(_)))
    ));

    service
        .process_withdrawal(withdrawal_id, false, Some("suspicious"), t0())
        .unwrap();
    let refunded = persistence::load_ledger(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();
    assert_eq!(refunded.coins, 500);

    // Already processed: approving now is refused.
    assert!(matches!(
        service.process_withdrawal(withdrawal_id, true, None, t0()),
        Err(ServiceError::Game(GameError::StateConflict(_)))
    ));
}

#[test]
fn gift_heavy_water_saturates_at_cap() {
    let mut service = service_with_users(&[1]);
    service.gift(1, GiftKind::HeavyWater, 9, t0()).unwrap();
    let ledger = persistence::load_ledger(service.store_mut().connection(), 1)
        .unwrap()
        .unwrap();
    assert_eq!(ledger.heavy_water, contracts::HEAVY_WATER_CAP);
}
