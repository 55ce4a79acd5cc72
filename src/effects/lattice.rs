use std::collections::{BTreeSet, VecDeque};

use serde_derive::{Deserialize, Serialize};

/// A concurrency effect, ordered into a lattice with [`Effect::Pure`] at the
/// bottom and [`Effect::Arbitrary`] at the top.
///
/// Discriminant values group the effects into bands (memory, threads,
/// channels, synchronization, atomics, pipeline, I/O) and provide the
/// deterministic tie-break when several minimal upper bounds exist.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Pure = 0,
    Alloc = 1,
    Free = 2,
    Read = 3,
    Write = 4,
    ThreadSpawn = 10,
    ThreadJoin = 11,
    ChannelSend = 20,
    ChannelRecv = 21,
    ActorSend = 30,
    WarpSync = 40,
    Barrier = 41,
    AtomicRead = 50,
    AtomicWrite = 51,
    AtomicRmw = 52,
    PipelineStage = 60,
    Io = 70,
    Network = 71,
    GpuLaunch = 80,
    FpgaProgram = 81,
    Arbitrary = 100,
}

/// An ordered set of effects, as carried by vertices and function types.
pub type EffectSet = BTreeSet<Effect>;

impl Effect {
    pub const ALL: [Effect; 21] = [
        Effect::Pure,
        Effect::Alloc,
        Effect::Free,
        Effect::Read,
        Effect::Write,
        Effect::ThreadSpawn,
        Effect::ThreadJoin,
        Effect::ChannelSend,
        Effect::ChannelRecv,
        Effect::ActorSend,
        Effect::WarpSync,
        Effect::Barrier,
        Effect::AtomicRead,
        Effect::AtomicWrite,
        Effect::AtomicRmw,
        Effect::PipelineStage,
        Effect::Io,
        Effect::Network,
        Effect::GpuLaunch,
        Effect::FpgaProgram,
        Effect::Arbitrary,
    ];

    /// The effects this effect directly covers (its immediate lower
    /// neighbours in the order).
    pub(crate) fn lower_covers(self) -> &'static [Effect] {
        match self {
            Effect::Pure => &[],
            Effect::Alloc => &[Effect::Pure],
            Effect::Free => &[Effect::Alloc],
            Effect::Read => &[Effect::Pure],
            Effect::Write => &[Effect::Read],
            Effect::ThreadSpawn => &[Effect::Write],
            Effect::ThreadJoin => &[Effect::ThreadSpawn],
            Effect::ChannelSend => &[Effect::ThreadJoin],
            Effect::ChannelRecv => &[Effect::ChannelSend],
            Effect::ActorSend => &[Effect::ChannelRecv],
            Effect::WarpSync => &[Effect::ActorSend],
            Effect::Barrier => &[Effect::WarpSync],
            Effect::AtomicRead => &[Effect::Read],
            Effect::AtomicWrite => &[Effect::AtomicRead, Effect::Write],
            Effect::AtomicRmw => &[Effect::AtomicWrite],
            Effect::PipelineStage => &[Effect::Barrier],
            Effect::Io => &[Effect::PipelineStage],
            Effect::Network => &[Effect::Io],
            Effect::GpuLaunch => &[Effect::WarpSync],
            Effect::FpgaProgram => &[Effect::Io],
            // The top element covers every maximal chain.
            Effect::Arbitrary => &[
                Effect::Free,
                Effect::Network,
                Effect::AtomicRmw,
                Effect::GpuLaunch,
                Effect::FpgaProgram,
            ],
        }
    }

    /// The effects directly covering this one (immediate upper neighbours).
    pub(crate) fn upper_covers(self) -> &'static [Effect] {
        match self {
            Effect::Pure => &[Effect::Alloc, Effect::Read],
            Effect::Alloc => &[Effect::Free],
            Effect::Free => &[Effect::Arbitrary],
            Effect::Read => &[Effect::Write, Effect::AtomicRead],
            Effect::Write => &[Effect::ThreadSpawn, Effect::AtomicWrite],
            Effect::ThreadSpawn => &[Effect::ThreadJoin],
            Effect::ThreadJoin => &[Effect::ChannelSend],
            Effect::ChannelSend => &[Effect::ChannelRecv],
            Effect::ChannelRecv => &[Effect::ActorSend],
            Effect::ActorSend => &[Effect::WarpSync],
            Effect::WarpSync => &[Effect::Barrier, Effect::GpuLaunch],
            Effect::Barrier => &[Effect::PipelineStage],
            Effect::AtomicRead => &[Effect::AtomicWrite],
            Effect::AtomicWrite => &[Effect::AtomicRmw],
            Effect::AtomicRmw => &[Effect::Arbitrary],
            Effect::PipelineStage => &[Effect::Io],
            Effect::Io => &[Effect::Network, Effect::FpgaProgram],
            Effect::Network => &[Effect::Arbitrary],
            Effect::GpuLaunch => &[Effect::Arbitrary],
            Effect::FpgaProgram => &[Effect::Arbitrary],
            Effect::Arbitrary => &[],
        }
    }

    pub fn is_sync(self) -> bool {
        matches!(
            self,
            Effect::ThreadJoin | Effect::ChannelRecv | Effect::Barrier | Effect::AtomicRmw
        )
    }
}

/// Lattice operations over [`Effect`].
pub struct EffectLattice;

impl EffectLattice {
    pub fn bottom() -> Effect {
        Effect::Pure
    }

    pub fn top() -> Effect {
        Effect::Arbitrary
    }

    /// a ⊑ b, decided by an upward breadth-first search over the cover
    /// relation.
    pub fn leq(a: Effect, b: Effect) -> bool {
        if a == b || b == Effect::Arbitrary || a == Effect::Pure {
            return true;
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([a]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            for &higher in current.upper_covers() {
                if higher == b {
                    return true;
                }
                queue.push_back(higher);
            }
        }
        false
    }

    /// a ⊔ b: the least element above both, with ties among minimal common
    /// upper bounds broken by discriminant.
    pub fn join(a: Effect, b: Effect) -> Effect {
        if Self::leq(a, b) {
            return b;
        }
        if Self::leq(b, a) {
            return a;
        }
        let above_a = Self::upward_closure(a);
        let above_b = Self::upward_closure(b);
        above_a
            .intersection(&above_b)
            .copied()
            .min()
            .unwrap_or(Effect::Arbitrary)
    }

    /// a ⊓ b: the greatest element below both.
    pub fn meet(a: Effect, b: Effect) -> Effect {
        if Self::leq(a, b) {
            return a;
        }
        if Self::leq(b, a) {
            return b;
        }
        let below_a = Self::downward_closure(a);
        let below_b = Self::downward_closure(b);
        below_a
            .intersection(&below_b)
            .copied()
            .max()
            .unwrap_or(Effect::Pure)
    }

    pub fn join_all<I: IntoIterator<Item = Effect>>(effects: I) -> Effect {
        effects
            .into_iter()
            .fold(Self::bottom(), |acc, e| Self::join(acc, e))
    }

    fn upward_closure(e: Effect) -> BTreeSet<Effect> {
        let mut closure = BTreeSet::from([e, Effect::Arbitrary]);
        let mut queue = VecDeque::from([e]);
        while let Some(current) = queue.pop_front() {
            for &higher in current.upper_covers() {
                if closure.insert(higher) {
                    queue.push_back(higher);
                }
            }
        }
        closure
    }

    fn downward_closure(e: Effect) -> BTreeSet<Effect> {
        let mut closure = BTreeSet::from([e, Effect::Pure]);
        let mut queue = VecDeque::from([e]);
        while let Some(current) = queue.pop_front() {
            for &lower in current.lower_covers() {
                if closure.insert(lower) {
                    queue.push_back(lower);
                }
            }
        }
        closure
    }
}
