//! In-memory referral forest used for downline aggregation.
//!
//! Edges are bind-time immutable and supposed to form a forest, but a
//! traversal never relies on that: every walk carries a visited set keyed
//! by normalized address and a hard depth counter, so corrupt (cyclic) data
//! terminates and is counted once.

use crate::{error::LedgerResult, store::LedgerStore, types::normalize};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// Aggregates over one wallet's downline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamStats {
    /// Σ committed investment of every downline wallet (self excluded).
    pub volume: Decimal,
    /// Distinct downline wallets (self excluded).
    pub members: u32,
}

/// Arena of wallet nodes. Node ids index `wallets`, `referrer` and `children`.
#[derive(Debug, Default)]
pub struct ReferralForest {
    wallets: Vec<String>,
    index: HashMap<String, usize>,
    referrer: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
}

impl ReferralForest {
    pub fn load(store: &LedgerStore) -> LedgerResult<Self> {
        Ok(Self::from_edges(store.all_referral_edges()?))
    }

    /// Build from `(member, referrer)` pairs.
    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut forest = Self::default();
        for (member, referrer) in edges {
            let m = forest.intern(member.as_ref());
            let r = forest.intern(referrer.as_ref());
            if forest.referrer[m].is_some() {
                continue;
            }
            forest.referrer[m] = Some(r);
            forest.children[r].push(m);
        }
        for kids in &mut forest.children {
            kids.sort_unstable();
        }
        forest
    }

    fn intern(&mut self, wallet: &str) -> usize {
        let key = normalize(wallet);
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.wallets.len();
        self.wallets.push(key.clone());
        self.index.insert(key, id);
        self.referrer.push(None);
        self.children.push(Vec::new());
        id
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn referrer_of(&self, wallet: &str) -> Option<&str> {
        let id = *self.index.get(&normalize(wallet))?;
        self.referrer[id].map(|r| self.wallets[r].as_str())
    }

    pub fn direct_referrals(&self, wallet: &str) -> Vec<&str> {
        match self.index.get(&normalize(wallet)) {
            Some(&id) => self.children[id]
                .iter()
                .map(|&c| self.wallets[c].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every wallet with at least one direct referral, sorted.
    pub fn referrers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, kids)| !kids.is_empty())
            .map(|(id, _)| self.wallets[id].as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Distinct downline wallets within `max_depth` levels, self excluded.
    ///
    /// Worklist DFS: a node enters the result the first time it is reached
    /// at depth ≤ `max_depth`; revisits (cycles) contribute nothing.
    pub fn downline(&self, wallet: &str, max_depth: usize) -> Vec<&str> {
        let Some(&root) = self.index.get(&normalize(wallet)) else {
            return Vec::new();
        };
        let mut visited: HashSet<usize> = HashSet::from([root]);
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        let mut out = Vec::new();

        while let Some((node, depth)) = stack.pop() {
            if depth >= max_depth {
                continue;
            }
            for &child in &self.children[node] {
                if visited.insert(child) {
                    out.push(self.wallets[child].as_str());
                    stack.push((child, depth + 1));
                }
            }
        }
        out
    }

    /// Team volume and member count over the bounded downline.
    /// `investments` maps a normalized wallet to its committed capital.
    pub fn team_stats(
        &self,
        wallet: &str,
        max_depth: usize,
        investments: &HashMap<String, Decimal>,
    ) -> TeamStats {
        let downline = self.downline(wallet, max_depth);
        let volume = downline
            .iter()
            .filter_map(|w| investments.get(*w))
            .copied()
            .sum();
        TeamStats {
            volume,
            members: downline.len() as u32,
        }
    }
}
