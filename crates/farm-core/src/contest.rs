//! Contest lifecycle: created -> active -> settled (ended, terminal).
//!
//! Settlement is a pure computation here; the service layer persists the
//! winner list, the ended status, and every prize credit inside one
//! transaction so the terminal transition and the disbursement commit
//! together.

use chrono::{DateTime, Datelike, Duration, Utc};
use contracts::{ContestKind, ContestStatus, ContestWinner, Placement, PrizeBundle, PrizePool};
use rand::seq::SliceRandom;
use rand::Rng;

use serde::Serialize;

use crate::clock;
use crate::error::GameError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Contest {
    pub id: i64,
    pub kind: ContestKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub entry_cost: i64,
    pub ads_required: i64,
    pub max_participants: i64,
    pub prize_pool: PrizePool,
    pub status: ContestStatus,
    /// Top-three placements, written exactly once at settlement.
    pub winners: Vec<ContestWinner>,
}

impl Contest {
    pub fn create(
        kind: ContestKind,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        entry_cost: i64,
        ads_required: i64,
        max_participants: i64,
        prize_pool: PrizePool,
    ) -> Self {
        Self {
            id: 0,
            kind,
            starts_at,
            ends_at,
            entry_cost,
            ads_required,
            max_participants,
            prize_pool,
            status: ContestStatus::Active,
            winners: Vec::new(),
        }
    }

    /// Stock contest for a scheduler boundary tick, with the original
    /// entry costs and ad thresholds per kind.
    pub fn scheduled(kind: ContestKind, now: DateTime<Utc>) -> Self {
        let (starts_at, ends_at) = default_window(kind, now);
        let (entry_cost, ads_required, max_participants) = match kind {
            ContestKind::Daily => (20, 5, 1000),
            ContestKind::Weekly => (100, 30, 5000),
            ContestKind::Monthly => (200, 100, 10_000),
        };
        Self::create(
            kind,
            starts_at,
            ends_at,
            entry_cost,
            ads_required,
            max_participants,
            PrizePool::default_for(kind),
        )
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == ContestStatus::Active && now < self.ends_at
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContestParticipant {
    pub contest_id: i64,
    pub user_id: i64,
    pub ads_watched: i64,
    pub joined_at: DateTime<Utc>,
}

/// Validate a join attempt. The store enforces the one-row-per-pair
/// uniqueness; this guards the window.
pub fn validate_join(contest: &Contest, now: DateTime<Utc>) -> Result<(), GameError> {
    if !contest.is_open(now) {
        return Err(GameError::conflict("Contest has already ended"));
    }
    Ok(())
}

/// One prize credit owed to one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Award {
    pub user_id: i64,
    pub placement: Placement,
    pub prize: PrizeBundle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub winners: Vec<ContestWinner>,
    pub awards: Vec<Award>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementDecision {
    /// Terminal state was already reached; nothing to do or redo.
    AlreadyEnded,
    /// The window is still open and settlement was not forced.
    NotDue,
    Settled(SettlementOutcome),
}

/// Compute the settlement for a contest. Qualification is a threshold
/// (`ads_watched >= ads_required`); placement among qualifiers is a
/// uniform random permutation; entry time and surplus ad watches do not
/// weight the draw. `force` settles an active contest before its end time
/// (the admin force-end path).
pub fn settle<R: Rng + ?Sized>(
    contest: &Contest,
    participants: &[ContestParticipant],
    now: DateTime<Utc>,
    force: bool,
    rng: &mut R,
) -> SettlementDecision {
    if contest.status == ContestStatus::Ended {
        return SettlementDecision::AlreadyEnded;
    }
    if now < contest.ends_at && !force {
        return SettlementDecision::NotDue;
    }

    let mut qualified: Vec<i64> = participants
        .iter()
        .filter(|participant| participant.ads_watched >= contest.ads_required)
        .map(|participant| participant.user_id)
        .collect();

    if qualified.is_empty() {
        return SettlementDecision::Settled(SettlementOutcome {
            winners: Vec::new(),
            awards: Vec::new(),
        });
    }

    qualified.shuffle(rng);

    let mut winners = Vec::new();
    let mut awards = Vec::new();
    let placements = [Placement::First, Placement::Second, Placement::Third];

    for (user_id, placement) in qualified.iter().copied().zip(placements) {
        if let Some(prize) = contest.prize_pool.for_placement(placement) {
            winners.push(ContestWinner {
                user_id,
                placement,
                prize,
            });
            awards.push(Award {
                user_id,
                placement,
                prize,
            });
        }
    }

    if let Some(prize) = contest.prize_pool.participation {
        for user_id in qualified.iter().copied().skip(placements.len()) {
            awards.push(Award {
                user_id,
                placement: Placement::Participation,
                prize,
            });
        }
    }

    SettlementDecision::Settled(SettlementOutcome { winners, awards })
}

/// The scheduler's contest window for a boundary at `now`: the enclosing
/// day, ISO week, or month, closing half an hour before the next boundary
/// so settlement runs inside the same period.
pub fn default_window(kind: ContestKind, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = clock::day_start(now);
    let start = match kind {
        ContestKind::Daily => day,
        ContestKind::Weekly => {
            day - Duration::days(i64::from(now.weekday().num_days_from_monday()))
        }
        ContestKind::Monthly => day - Duration::days(i64::from(now.day()) - 1),
    };
    let next_boundary = match kind {
        ContestKind::Daily => start + Duration::days(1),
        ContestKind::Weekly => start + Duration::days(7),
        ContestKind::Monthly => {
            let days_in_month = {
                let probe = start + Duration::days(32);
                let next_start = probe - Duration::days(i64::from(probe.day()) - 1);
                (clock::day_start(next_start) - start).num_days()
            };
            start + Duration::days(days_in_month)
        }
    };
    (start, next_boundary - Duration::minutes(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap()
    }

    fn participant(contest_id: i64, user_id: i64, ads: i64) -> ContestParticipant {
        ContestParticipant {
            contest_id,
            user_id,
            ads_watched: ads,
            joined_at: t0(),
        }
    }

    #[test]
    fn join_rejected_after_window_closes() {
        let contest = Contest::scheduled(ContestKind::Daily, t0());
        assert!(validate_join(&contest, t0()).is_ok());
        assert!(matches!(
            validate_join(&contest, contest.ends_at),
            Err(GameError::StateConflict(_))
        ));
    }

    #[test]
    fn settlement_distributes_three_distinct_placements() {
        let mut contest = Contest::scheduled(ContestKind::Daily, t0());
        contest.id = 1;
        let participants = vec![
            participant(1, 101, 5),
            participant(1, 102, 9),
            participant(1, 103, 5),
        ];

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let decision = settle(&contest, &participants, contest.ends_at, false, &mut rng);
        let SettlementDecision::Settled(outcome) = decision else {
            panic!("expected settlement");
        };

        assert_eq!(outcome.winners.len(), 3);
        let mut recipients: Vec<i64> = outcome.winners.iter().map(|w| w.user_id).collect();
        recipients.sort_unstable();
        assert_eq!(recipients, vec![101, 102, 103]);

        let coins: Vec<i64> = outcome.winners.iter().map(|w| w.prize.coins).collect();
        assert_eq!(coins, vec![1000, 500, 250]);
    }

    #[test]
    fn unqualified_participants_are_excluded() {
        let mut contest = Contest::scheduled(ContestKind::Daily, t0());
        contest.id = 1;
        let participants = vec![participant(1, 101, 4), participant(1, 102, 5)];

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let SettlementDecision::Settled(outcome) =
            settle(&contest, &participants, contest.ends_at, false, &mut rng)
        else {
            panic!("expected settlement");
        };
        assert_eq!(outcome.winners.len(), 1);
        assert_eq!(outcome.winners[0].user_id, 102);
        assert_eq!(outcome.winners[0].placement, Placement::First);
    }

    #[test]
    fn no_qualifiers_ends_with_empty_winner_list() {
        let mut contest = Contest::scheduled(ContestKind::Daily, t0());
        contest.id = 1;
        let participants = vec![participant(1, 101, 0)];

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let SettlementDecision::Settled(outcome) =
            settle(&contest, &participants, contest.ends_at, false, &mut rng)
        else {
            panic!("expected settlement");
        };
        assert!(outcome.winners.is_empty());
        assert!(outcome.awards.is_empty());
    }

    #[test]
    fn participation_prize_goes_to_qualifiers_outside_top_three() {
        let mut contest = Contest::scheduled(ContestKind::Weekly, t0());
        contest.id = 2;
        let participants: Vec<ContestParticipant> =
            (1..=5).map(|user| participant(2, user, 30)).collect();

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let SettlementDecision::Settled(outcome) =
            settle(&contest, &participants, contest.ends_at, false, &mut rng)
        else {
            panic!("expected settlement");
        };

        assert_eq!(outcome.winners.len(), 3);
        assert_eq!(outcome.awards.len(), 5);
        let participation: Vec<&Award> = outcome
            .awards
            .iter()
            .filter(|award| award.placement == Placement::Participation)
            .collect();
        assert_eq!(participation.len(), 2);
        for award in participation {
            assert_eq!(award.prize.coins, 100);
            assert!(!outcome.winners.iter().any(|w| w.user_id == award.user_id));
        }
    }

    #[test]
    fn settle_is_a_no_op_once_ended() {
        let mut contest = Contest::scheduled(ContestKind::Daily, t0());
        contest.status = ContestStatus::Ended;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            settle(&contest, &[], contest.ends_at, false, &mut rng),
            SettlementDecision::AlreadyEnded
        );
    }

    #[test]
    fn settle_before_end_requires_force() {
        let contest = Contest::scheduled(ContestKind::Daily, t0());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            settle(&contest, &[], t0(), false, &mut rng),
            SettlementDecision::NotDue
        );
        assert!(matches!(
            settle(&contest, &[], t0(), true, &mut rng),
            SettlementDecision::Settled(_)
        ));
    }

    #[test]
    fn same_seed_same_permutation() {
        let mut contest = Contest::scheduled(ContestKind::Daily, t0());
        contest.id = 1;
        let participants: Vec<ContestParticipant> =
            (1..=10).map(|user| participant(1, user, 5)).collect();

        let run = |seed: u64| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            settle(&contest, &participants, contest.ends_at, false, &mut rng)
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn windows_close_half_an_hour_before_the_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap(); // a Wednesday

        let (start, end) = default_window(ContestKind::Daily, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 5, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 5, 23, 30, 0).unwrap());

        let (start, end) = default_window(ContestKind::Weekly, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 9, 23, 30, 0).unwrap());

        let (start, end) = default_window(ContestKind::Monthly, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 30, 23, 30, 0).unwrap());
    }
}
