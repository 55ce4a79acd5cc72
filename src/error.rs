use std::fmt;

use derive_more::From;

use crate::utils::PANIC_ON_ERROR;

/// An error raised by the core, carrying the taxonomy kind and the chain of
/// analysis contexts it passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SirError {
    pub(crate) kind: SirErrorKind,
    pub(crate) context: Vec<String>,
}

impl SirError {
    pub(crate) fn new(kind: SirErrorKind, context: Vec<String>) -> Self {
        assert!(
            !*PANIC_ON_ERROR,
            "SIR Error: {:?} ({})",
            kind,
            context.join(", ")
        );
        Self { kind, context }
    }

    pub fn kind(&self) -> &SirErrorKind {
        &self.kind
    }

    pub(crate) fn with_context(mut self, ctxt: impl Into<String>) -> Self {
        self.context.push(ctxt.into());
        self
    }

    pub(crate) fn invalid_graph(err: InvalidGraphError) -> Self {
        Self::new(SirErrorKind::InvalidGraph(err), vec![])
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Self::new(SirErrorKind::UnsupportedOperation(what.into()), vec![])
    }
}

impl fmt::Display for SirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.context.is_empty() {
            write!(f, " ({})", self.context.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for SirError {}

#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum SirErrorKind {
    InvalidGraph(InvalidGraphError),
    TypeError(TypeError),
    LinearityViolation(LinearityViolation),
    MemorySafetyViolation(MemorySafetyViolation),
    BorrowViolation(BorrowViolation),
    RegionError(RegionError),
    RaceDetected(RaceDetected),
    DeadlockDetected(DeadlockDetected),
    ProofInvalid(ProofInvalid),
    #[from(ignore)]
    UnsupportedOperation(String),
}

impl fmt::Display for SirErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SirErrorKind::InvalidGraph(e) => write!(f, "invalid graph: {e:?}"),
            SirErrorKind::TypeError(e) => write!(f, "type error: {e:?}"),
            SirErrorKind::LinearityViolation(e) => write!(f, "linearity violation: {e:?}"),
            SirErrorKind::MemorySafetyViolation(e) => {
                write!(f, "memory safety violation: {e:?}")
            }
            SirErrorKind::BorrowViolation(e) => write!(f, "borrow violation: {e:?}"),
            SirErrorKind::RegionError(e) => write!(f, "region error: {e:?}"),
            SirErrorKind::RaceDetected(e) => write!(f, "race detected: {e:?}"),
            SirErrorKind::DeadlockDetected(e) => write!(f, "deadlock detected: {e:?}"),
            SirErrorKind::ProofInvalid(e) => write!(f, "proof invalid: {e:?}"),
            SirErrorKind::UnsupportedOperation(what) => {
                write!(f, "unsupported operation: {what}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidGraphError {
    /// An edge endpoint is not a member of the graph's vertex set
    /// (strict insertion only; the permissive variant auto-inserts).
    InvalidEdge { edge: String, endpoint: String },
    /// A lookup referenced an identity the graph has never registered.
    UnknownId(String),
    /// A serialized tree could not be decoded back into a graph.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    UnificationFailure { left: String, right: String },
    IllTyped { vertex: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinearityViolation {
    UnconsumedLinear(String),
    DoubleConsume(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemorySafetyViolation {
    UseAfterFree { vertex: String, alloc: String },
    UseAfterMove { vertex: String },
    DoubleFree { alloc: String },
    MissingAllocation { vertex: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BorrowViolation {
    AliasingConflict { block: String, detail: String },
    BorrowOutlivesBlock { borrow: String, block: String },
    BorrowedAtFree { alloc: String },
    MovedWhileBorrowed { block: String },
    NotOwner { block: String, vertex: String },
    UnknownBlock(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    OutOfRegion {
        region: String,
        requested: u64,
        limit: u64,
    },
    IllegalTransfer {
        source: String,
        target: String,
    },
    UnknownRegion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceDetected {
    pub first: String,
    pub second: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockDetected {
    pub cycle: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofInvalid {
    BadPremise { premise: String },
    BadEvidence { kind: String, detail: String },
    StructuralCheckFailed { kind: String, detail: String },
}

/// Collected analysis output. Analyses accumulate into these two lists and
/// return them rather than failing on the first finding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub errors: Vec<SirError>,
    pub warnings: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, kind: impl Into<SirErrorKind>) {
        self.errors.push(SirError::new(kind.into(), vec![]));
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
