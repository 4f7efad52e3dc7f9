//! Account rotation for browser-driven OAuth completion.
//!
//! In-memory only. An account that is leased to a running OAuth attempt is
//! never handed out again until released, so two concurrent attempts can
//! not drive the same identity.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Least-recently-used first; never-used accounts before any used one.
    #[default]
    Lru,
    RoundRobin,
    Random,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "lru" => Ok(Self::Lru),
            "round_robin" | "rr" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            _ => Err(ParseError::UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Snapshot row for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub email: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub in_use: bool,
}

#[derive(Debug, Clone)]
pub struct AccountPool {
    accounts: Vec<Account>,
    strategy: Strategy,
    next_index: usize,
    in_use: HashSet<String>,
}

impl AccountPool {
    /// Build a pool from emails in configured order. Blank and duplicate
    /// entries are dropped.
    pub fn new<I, S>(emails: I, strategy: Strategy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut accounts: Vec<Account> = Vec::new();
        for email in emails {
            let email = email.as_ref().trim();
            if email.is_empty() || accounts.iter().any(|a| a.email == email) {
                continue;
            }
            accounts.push(Account {
                email: email.to_string(),
                last_used_at: None,
            });
        }
        Self {
            accounts,
            strategy,
            next_index: 0,
            in_use: HashSet::new(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Lease an account. `None` when every account is busy (or none exist).
    pub fn select(&mut self, now: DateTime<Utc>, rng: &mut impl Rng) -> Option<String> {
        let free: Vec<usize> = (0..self.accounts.len())
            .filter(|&i| !self.in_use.contains(&self.accounts[i].email))
            .collect();
        if free.is_empty() {
            return None;
        }

        let idx = match self.strategy {
            // min_by_key keeps the first of equal keys: ties fall back to
            // configured order, and None sorts before any timestamp.
            Strategy::Lru => *free
                .iter()
                .min_by_key(|&&i| self.accounts[i].last_used_at)?,
            Strategy::RoundRobin => {
                let n = self.accounts.len();
                let idx = (0..n)
                    .map(|off| (self.next_index + off) % n)
                    .find(|i| free.contains(i))?;
                self.next_index = (idx + 1) % n;
                idx
            }
            Strategy::Random => free[rng.gen_range(0..free.len())],
        };

        let account = &mut self.accounts[idx];
        account.last_used_at = Some(now);
        self.in_use.insert(account.email.clone());
        Some(account.email.clone())
    }

    /// Return a leased account to the pool.
    pub fn release(&mut self, email: &str) {
        self.in_use.remove(email);
    }

    pub fn snapshot(&self) -> Vec<AccountStatus> {
        self.accounts
            .iter()
            .map(|a| AccountStatus {
                email: a.email.clone(),
                last_used_at: a.last_used_at,
                in_use: self.in_use.contains(&a.email),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use super::Strategy;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid")
            .with_timezone(&Utc)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    const EMAILS: [&str; 3] = ["a@x.io", "b@x.io", "c@x.io"];

    #[test]
    fn strategy_parse_variants() {
        assert_eq!("lru".parse::<Strategy>().expect("ok"), Strategy::Lru);
        assert_eq!("round-robin".parse::<Strategy>().expect("ok"), Strategy::RoundRobin);
        assert_eq!("round_robin".parse::<Strategy>().expect("ok"), Strategy::RoundRobin);
        assert_eq!("RANDOM".parse::<Strategy>().expect("ok"), Strategy::Random);
        assert!("fifo".parse::<Strategy>().is_err());
    }

    #[test]
    fn pool_drops_blank_and_duplicate_emails() {
        let pool = AccountPool::new(["a@x.io", " ", "a@x.io", "b@x.io"], Strategy::Lru);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn lru_spreads_across_accounts() {
        let mut pool = AccountPool::new(EMAILS, Strategy::Lru);
        let mut r = rng();
        let t = ts("2026-10-19T12:00:00Z");
        let mut picked = Vec::new();
        for i in 0..3 {
            let email = pool.select(t + TimeDelta::seconds(i), &mut r).expect("free");
            pool.release(&email);
            picked.push(email);
        }
        assert_eq!(picked, EMAILS);
        // Oldest use comes round again.
        let again = pool.select(t + TimeDelta::seconds(10), &mut r).expect("free");
        assert_eq!(again, "a@x.io");
    }

    #[test]
    fn lru_prefers_least_recent_after_release() {
        let mut pool = AccountPool::new(EMAILS, Strategy::Lru);
        let mut r = rng();
        let t = ts("2026-10-19T12:00:00Z");
        for i in 0..3 {
            let e = pool.select(t + TimeDelta::seconds(i), &mut r).expect("free");
            pool.release(&e);
        }
        // Touch a and b again; c becomes least recent.
        for i in 3..5 {
            let e = pool.select(t + TimeDelta::seconds(i), &mut r).expect("free");
            pool.release(&e);
        }
        assert_eq!(pool.select(t + TimeDelta::seconds(9), &mut r).as_deref(), Some("c@x.io"));
    }

    #[test]
    fn round_robin_is_strict_rotation() {
        let mut pool = AccountPool::new(EMAILS, Strategy::RoundRobin);
        let mut r = rng();
        let t = ts("2026-10-19T12:00:00Z");
        let order: Vec<String> = (0..6)
            .map(|_| {
                let e = pool.select(t, &mut r).expect("free");
                pool.release(&e);
                e
            })
            .collect();
        assert_eq!(order, ["a@x.io", "b@x.io", "c@x.io", "a@x.io", "b@x.io", "c@x.io"]);
    }

    #[test]
    fn round_robin_skips_busy_accounts() {
        let mut pool = AccountPool::new(EMAILS, Strategy::RoundRobin);
        let mut r = rng();
        let t = ts("2026-10-19T12:00:00Z");
        let first = pool.select(t, &mut r).expect("free");
        assert_eq!(first, "a@x.io");
        let second = pool.select(t, &mut r).expect("free");
        assert_eq!(second, "b@x.io");
        pool.release(&second);
        // a still leased; rotation continues at c, then wraps past a to b.
        assert_eq!(pool.select(t, &mut r).as_deref(), Some("c@x.io"));
        assert_eq!(pool.select(t, &mut r).as_deref(), Some("b@x.io"));
        assert_eq!(pool.select(t, &mut r), None);
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let mut pool = AccountPool::new(["only@x.io"], Strategy::Random);
        let mut r = rng();
        let t = ts("2026-10-19T12:00:00Z");
        assert!(pool.select(t, &mut r).is_some());
        assert_eq!(pool.select(t, &mut r), None);
        pool.release("only@x.io");
        assert!(pool.select(t, &mut r).is_some());
    }

    #[test]
    fn empty_pool_never_selects() {
        let mut pool = AccountPool::new(Vec::<String>::new(), Strategy::Lru);
        assert!(pool.is_empty());
        assert_eq!(pool.select(ts("2026-10-19T12:00:00Z"), &mut rng()), None);
    }

    #[test]
    fn snapshot_reports_usage() {
        let mut pool = AccountPool::new(EMAILS, Strategy::Lru);
        let t = ts("2026-10-19T12:00:00Z");
        pool.select(t, &mut rng());
        let snap = pool.snapshot();
        assert!(snap[0].in_use);
        assert_eq!(snap[0].last_used_at, Some(t));
        assert!(!snap[1].in_use);
        assert_eq!(snap.iter().filter(|a| a.in_use).count(), 1);
    }

    proptest! {
        #[test]
        fn concurrent_leases_are_distinct(
            strategy in prop_oneof![Just(Strategy::Lru), Just(Strategy::RoundRobin), Just(Strategy::Random)],
            n in 1usize..6,
            seed in any::<u64>(),
        ) {
            let emails: Vec<String> = (0..n).map(|i| format!("u{i}@x.io")).collect();
            let mut pool = AccountPool::new(&emails, strategy);
            let mut r = StdRng::seed_from_u64(seed);
            let t = ts("2026-10-19T12:00:00Z");
            let mut leased = HashSet::new();
            for _ in 0..n {
                let e = pool.select(t, &mut r).expect("one free per account");
                prop_assert!(leased.insert(e));
            }
            prop_assert_eq!(pool.select(t, &mut r), None);
        }
    }
}
