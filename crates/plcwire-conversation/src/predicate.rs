// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Response predicates and frame classification.
//!
//! A predicate decides whether a decoded frame resolves one pending entry,
//! and whether it does so as a success or as a protocol abort. Matching is
//! type-and-identity based:
//!
//! 1. **Identity**: is this frame one the entry could ever resolve?
//!    (for example "node 5, service TRANSMIT_SDO")
//! 2. **Type**: is the payload the expected success type, or the protocol's
//!    universal abort payload?
//!
//! [`classify`] runs a frame against a set of pending entries and picks the
//! single entry it resolves.

use std::fmt;

// =============================================================================
// Verdict
// =============================================================================

/// A device-reported rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortInfo {
    /// Protocol-specific abort code.
    pub code: u32,
    /// Human readable description of the code.
    pub message: String,
}

impl AbortInfo {
    /// Creates abort information.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for AbortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X} ({})", self.code, self.message)
    }
}

/// Result of testing one frame against one predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The frame does not resolve this entry.
    NoMatch,
    /// The frame carries the expected payload.
    Success,
    /// The frame carries the protocol's abort payload for this entry.
    Abort(AbortInfo),
}

impl Verdict {
    /// Returns `true` unless this is [`Verdict::NoMatch`].
    #[inline]
    pub fn is_match(&self) -> bool {
        !matches!(self, Verdict::NoMatch)
    }
}

// =============================================================================
// Predicate trait
// =============================================================================

/// Decides whether a frame resolves a pending entry.
pub trait ResponsePredicate<F>: Send + Sync {
    /// Tests a frame.
    fn test(&self, frame: &F) -> Verdict;

    /// Short description for logging.
    fn describe(&self) -> String {
        "predicate".to_string()
    }
}

/// Boxed predicate as stored in the pending registry.
pub type BoxPredicate<F> = Box<dyn ResponsePredicate<F>>;

type Check<F> = Box<dyn Fn(&F) -> bool + Send + Sync>;
type AbortCheck<F> = Box<dyn Fn(&F) -> Option<AbortInfo> + Send + Sync>;

/// Identity check, then "expected type OR abort".
///
/// # Examples
///
/// ```
/// use plcwire_conversation::predicate::{AbortInfo, MatchPredicate, ResponsePredicate, Verdict};
///
/// #[derive(Debug)]
/// enum Frame { Data { node: u8 }, Abort { node: u8, code: u32 } }
///
/// let predicate = MatchPredicate::new("node 5", |f: &Frame| match f {
///         Frame::Data { node } | Frame::Abort { node, .. } => *node == 5,
///     })
///     .expecting(|f| matches!(f, Frame::Data { .. }))
///     .or_abort(|f| match f {
///         Frame::Abort { code, .. } => Some(AbortInfo::new(*code, "rejected")),
///         _ => None,
///     });
///
/// assert_eq!(predicate.test(&Frame::Data { node: 5 }), Verdict::Success);
/// assert_eq!(predicate.test(&Frame::Data { node: 6 }), Verdict::NoMatch);
/// assert!(matches!(predicate.test(&Frame::Abort { node: 5, code: 1 }), Verdict::Abort(_)));
/// ```
pub struct MatchPredicate<F> {
    description: String,
    identity: Check<F>,
    expected: Check<F>,
    abort: AbortCheck<F>,
}

impl<F> MatchPredicate<F> {
    /// Creates a predicate that accepts any frame passing `identity`.
    pub fn new(
        description: impl Into<String>,
        identity: impl Fn(&F) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            identity: Box::new(identity),
            expected: Box::new(|_| true),
            abort: Box::new(|_| None),
        }
    }

    /// Narrows success to frames of the expected payload type.
    pub fn expecting(mut self, expected: impl Fn(&F) -> bool + Send + Sync + 'static) -> Self {
        self.expected = Box::new(expected);
        self
    }

    /// Accepts the protocol's abort payload as an alternate match.
    pub fn or_abort(
        mut self,
        abort: impl Fn(&F) -> Option<AbortInfo> + Send + Sync + 'static,
    ) -> Self {
        self.abort = Box::new(abort);
        self
    }

    /// Boxes the predicate for registration.
    pub fn boxed(self) -> BoxPredicate<F>
    where
        F: 'static,
    {
        Box::new(self)
    }
}

impl<F> ResponsePredicate<F> for MatchPredicate<F> {
    fn test(&self, frame: &F) -> Verdict {
        if !(self.identity)(frame) {
            return Verdict::NoMatch;
        }
        if let Some(abort) = (self.abort)(frame) {
            return Verdict::Abort(abort);
        }
        if (self.expected)(frame) {
            Verdict::Success
        } else {
            Verdict::NoMatch
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Outcome of classifying one frame against the pending entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<K> {
    /// No entry is resolved by the frame.
    NoMatch,
    /// The frame resolves the entry with this key successfully.
    Success(K),
    /// The frame aborts the entry with this key.
    Abort(K, AbortInfo),
}

impl<K> Classification<K> {
    /// Returns the matched key, if any.
    pub fn key(&self) -> Option<&K> {
        match self {
            Classification::NoMatch => None,
            Classification::Success(key) | Classification::Abort(key, _) => Some(key),
        }
    }
}

/// Picks the single entry a frame resolves.
///
/// `entries` yields `(key, order, predicate)`. When several entries match,
/// the one with the lowest `order` (oldest registration) wins and the rest
/// keep waiting.
pub fn classify<'a, K, F, I>(frame: &F, entries: I) -> Classification<K>
where
    K: Clone + 'a,
    F: 'a,
    I: IntoIterator<Item = (&'a K, u64, &'a dyn ResponsePredicate<F>)>,
{
    let mut best: Option<(u64, &K, Verdict)> = None;
    let mut matches = 0usize;

    for (key, order, predicate) in entries {
        let verdict = predicate.test(frame);
        if !verdict.is_match() {
            continue;
        }
        matches += 1;
        if best.as_ref().map_or(true, |(o, _, _)| order < *o) {
            best = Some((order, key, verdict));
        }
    }

    if matches > 1 {
        tracing::debug!(matches, "frame matched several pending entries; oldest wins");
    }

    match best {
        None => Classification::NoMatch,
        Some((_, key, Verdict::Success)) => Classification::Success(key.clone()),
        Some((_, key, Verdict::Abort(info))) => Classification::Abort(key.clone(), info),
        Some((_, _, Verdict::NoMatch)) => Classification::NoMatch,
    }
}

// =============================================================================
// Tests
// =============================================================================
