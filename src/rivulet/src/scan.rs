//! Pipeline introspection.
//!
//! Every stage answers a single polymorphic query, [`Scan::scan_unsafe`],
//! over a closed set of typed attribute keys. Unsupported attributes fall
//! back to the key's declared default instead of erroring, so an external
//! tool can walk a live pipeline and read internal counters without knowing
//! any stage's concrete type. Chain-walking (`parents`, `actuals`) is
//! derived from the stage-reference attributes, never stored.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::StreamError;

/// Maximum hops for derived chain walks. A cyclic or self-referential
/// `Parent`/`Actual` chain therefore yields a finite sequence instead of
/// hanging the caller.
const MAX_CHAIN_HOPS: usize = 64;

/// A user-defined attribute key with a library-supplied default value.
///
/// Generic keys are process-wide constants; equality is by identifier.
///
/// ```
/// use rivulet::scan::GenericAttr;
///
/// static REGION: GenericAttr = GenericAttr::new("region", "global");
/// ```
#[derive(Debug, Clone)]
pub struct GenericAttr {
    id: &'static str,
    default: &'static str,
}

impl PartialEq for GenericAttr {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GenericAttr {}

impl GenericAttr {
    pub const fn new(id: &'static str, default: &'static str) -> Self {
        Self { id, default }
    }

    pub const fn id(&self) -> &'static str {
        self.id
    }

    pub const fn default_value(&self) -> &'static str {
        self.default
    }

    /// The key itself, usable wherever an [`Attr`] is expected.
    pub fn key(&self) -> Attr {
        Attr::Generic(self.clone())
    }
}

/// Typed attribute keys a stage may be asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    /// Elements currently buffered inside the stage.
    Buffered,
    /// Configured buffer capacity.
    Capacity,
    /// Upstream prefetch window.
    Prefetch,
    /// Net demand the downstream has granted and not yet received.
    RequestedFromDownstream,
    /// Whether the consumer side has cancelled.
    Cancelled,
    /// Whether the stage defers error delivery until its buffer drains.
    DelayError,
    /// Whether a terminal signal has been observed.
    Terminated,
    /// The terminal error, if the stage errored.
    Error,
    /// The upstream stage this one consumes from.
    Parent,
    /// The downstream stage this one produces to.
    Actual,
    /// Display name attached to the stage.
    Name,
    /// Tags attached to the stage (cumulative along the chain).
    Tags,
    /// A user-registered key carrying its own default.
    Generic(GenericAttr),
}

impl Attr {
    /// The meaningful default returned by [`Scan::scan`] when the stage
    /// itself has no answer. Keys without a meaningful default return
    /// `None` here and surface as `None` from `scan` as well.
    pub fn built_in_default(&self) -> Option<AttrValue> {
        match self {
            Attr::Buffered | Attr::Capacity | Attr::Prefetch => Some(AttrValue::Int(0)),
            Attr::RequestedFromDownstream => Some(AttrValue::Long(0)),
            Attr::DelayError => Some(AttrValue::Bool(false)),
            Attr::Tags => Some(AttrValue::Tags(Vec::new())),
            Attr::Generic(key) => Some(AttrValue::Str(key.default.to_string())),
            Attr::Cancelled
            | Attr::Terminated
            | Attr::Error
            | Attr::Parent
            | Attr::Actual
            | Attr::Name => None,
        }
    }
}

/// Values produced on demand by a stage; never cached.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Int(usize),
    Long(u64),
    Bool(bool),
    Err(StreamError),
    Stage(StageRef),
    Str(String),
    Tags(Vec<String>),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<usize> {
        match self {
            AttrValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<u64> {
        match self {
            AttrValue::Long(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&StreamError> {
        match self {
            AttrValue::Err(error) => Some(error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_stage(self) -> Option<StageRef> {
        match self {
            AttrValue::Stage(stage) => Some(stage),
            _ => None,
        }
    }

    pub fn into_tags(self) -> Option<Vec<String>> {
        match self {
            AttrValue::Tags(tags) => Some(tags),
            _ => None,
        }
    }
}

/// Cloneable handle to a stage, used as the stage-reference attribute value.
#[derive(Clone)]
pub struct StageRef(Arc<dyn Scan>);

impl StageRef {
    pub fn new(stage: Arc<dyn Scan>) -> Self {
        Self(stage)
    }

    /// A reference to the distinguished "cannot be introspected" sentinel.
    pub fn unavailable() -> Self {
        Self(unavailable())
    }
}

impl std::ops::Deref for StageRef {
    type Target = dyn Scan;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageRef({})", self.0.name())
    }
}

/// The uniform introspection capability.
///
/// Implementors override [`Scan::scan_unsafe`] for the attributes they
/// support; everything else is derived. The default implementation answers
/// nothing, which makes a stage scannable with meaningful defaults only.
pub trait Scan: Send + Sync {
    /// Raw answer for `key`, without default substitution.
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        let _ = key;
        None
    }

    /// `false` only for the distinguished unavailable sentinel.
    fn is_scan_available(&self) -> bool {
        true
    }

    /// Fan-out/fan-in children (for example a merge operator's per-source
    /// inner subscribers). Stages without inner stages answer empty.
    fn inners(&self) -> Vec<StageRef> {
        Vec::new()
    }

    /// Answer for `key`, falling back to the key's built-in default.
    fn scan(&self, key: &Attr) -> Option<AttrValue> {
        match self.scan_unsafe(key) {
            Some(value) => Some(value),
            None => key.built_in_default(),
        }
    }

    /// Two-level lookup: stage-defined value, else the key's built-in
    /// default, else `fallback`. The built-in default always wins over a
    /// caller-supplied fallback when the key defines one.
    fn scan_or_default(&self, key: &Attr, fallback: AttrValue) -> AttrValue {
        self.scan(key).unwrap_or(fallback)
    }

    /// Lazy finite walk of the `Parent` chain, excluding this stage.
    fn parents(&self) -> StageIter {
        StageIter::new(self.scan_unsafe(&Attr::Parent), Attr::Parent)
    }

    /// Lazy finite walk of the `Actual` chain, excluding this stage.
    fn actuals(&self) -> StageIter {
        StageIter::new(self.scan_unsafe(&Attr::Actual), Attr::Actual)
    }

    /// Tags of this stage unioned with its upstream chain's tags,
    /// first-seen order, deduplicated by value.
    fn tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        collect_tags(&mut tags, self.scan_unsafe(&Attr::Tags));
        for parent in self.parents() {
            collect_tags(&mut tags, parent.scan_unsafe(&Attr::Tags));
        }
        tags
    }

    /// Display name: this stage's own, else the nearest named ancestor's.
    fn name(&self) -> String {
        if let Some(name) = self.scan_unsafe(&Attr::Name).and_then(|v| v.as_str().map(String::from)) {
            return name;
        }
        for parent in self.parents() {
            if let Some(name) = parent
                .scan_unsafe(&Attr::Name)
                .and_then(|v| v.as_str().map(String::from))
            {
                return name;
            }
        }
        String::from("unknown")
    }
}

fn collect_tags(into: &mut Vec<String>, answer: Option<AttrValue>) {
    if let Some(tags) = answer.and_then(AttrValue::into_tags) {
        for tag in tags {
            if !into.contains(&tag) {
                into.push(tag);
            }
        }
    }
}

/// Restartable iterator over a stage-reference chain.
pub struct StageIter {
    next: Option<StageRef>,
    key: Attr,
    remaining: usize,
}

impl StageIter {
    fn new(first: Option<AttrValue>, key: Attr) -> Self {
        Self {
            next: first.and_then(AttrValue::into_stage),
            key,
            remaining: MAX_CHAIN_HOPS,
        }
    }
}

impl Iterator for StageIter {
    type Item = StageRef;

    fn next(&mut self) -> Option<StageRef> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next.take()?;
        self.next = current.scan_unsafe(&self.key).and_then(AttrValue::into_stage);
        Some(current)
    }
}

struct Unavailable;

impl Scan for Unavailable {
    fn is_scan_available(&self) -> bool {
        false
    }
}

static UNAVAILABLE: Lazy<Arc<Unavailable>> = Lazy::new(|| Arc::new(Unavailable));

/// The distinguished stage that cannot be introspected: every query answers
/// the key's default, and [`Scan::is_scan_available`] is `false`.
pub fn unavailable() -> Arc<dyn Scan> {
    Arc::clone(&*UNAVAILABLE) as Arc<dyn Scan>
}

#[cfg(test)]
mod tests {
    use super::*;

    static CUSTOM_STRING: GenericAttr = GenericAttr::new("custom", "global");

    /// A stage answering a fixed set of attributes, with an ACTUAL chain of
    /// depth two for the walk tests.
    struct FixedStage;

    struct TailStage;

    impl Scan for TailStage {}

    struct MidStage;

    impl Scan for MidStage {
        fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
            match key {
                Attr::Actual => Some(AttrValue::Stage(StageRef::new(Arc::new(TailStage)))),
                _ => None,
            }
        }
    }

    impl Scan for FixedStage {
        fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
            match key {
                Attr::Buffered => Some(AttrValue::Int(1)),
                Attr::Terminated => Some(AttrValue::Bool(true)),
                Attr::Actual => Some(AttrValue::Stage(StageRef::new(Arc::new(MidStage)))),
                _ => None,
            }
        }
    }

    struct EmptyStage;

    impl Scan for EmptyStage {}

    #[test]
    fn unavailable_stage_answers_defaults_only() {
        let stage = unavailable();
        assert!(!stage.is_scan_available());
        assert_eq!(stage.inners().len(), 0);
        assert_eq!(stage.parents().count(), 0);
        assert_eq!(stage.actuals().count(), 0);
        assert!(stage.scan(&Attr::Terminated).is_none());
        assert!(stage.scan(&Attr::Actual).is_none());
        assert_eq!(
            stage
                .scan_or_default(&Attr::Buffered, AttrValue::Int(0))
                .as_int(),
            Some(0)
        );
    }

    #[test]
    fn meaningful_defaults() {
        let stage = EmptyStage;

        assert_eq!(stage.scan(&Attr::Buffered).unwrap().as_int(), Some(0));
        assert_eq!(stage.scan(&Attr::Capacity).unwrap().as_int(), Some(0));
        assert_eq!(stage.scan(&Attr::Prefetch).unwrap().as_int(), Some(0));

        assert_eq!(
            stage.scan(&Attr::RequestedFromDownstream).unwrap().as_long(),
            Some(0)
        );

        assert!(stage.scan(&Attr::Cancelled).is_none());
        assert_eq!(stage.scan(&Attr::DelayError).unwrap().as_bool(), Some(false));
        assert!(stage.scan(&Attr::Terminated).is_none());

        assert!(stage.scan(&Attr::Error).is_none());

        assert!(stage.scan(&Attr::Actual).is_none());
        assert!(stage.scan(&Attr::Parent).is_none());

        let random = GenericAttr::new("random", "foo");
        assert_eq!(stage.scan(&random.key()).unwrap().as_str(), Some("foo"));
    }

    #[test]
    fn available_stage_answers_and_walks() {
        let stage = FixedStage;
        assert!(stage.is_scan_available());
        assert_eq!(stage.inners().len(), 0);
        assert_eq!(stage.parents().count(), 0);
        assert_eq!(stage.actuals().count(), 2);
        assert_eq!(stage.scan(&Attr::Terminated).unwrap().as_bool(), Some(true));
        assert_eq!(
            stage.scan_or_default(&Attr::Buffered, AttrValue::Int(0)).as_int(),
            Some(1)
        );
    }

    #[test]
    fn built_in_default_beats_caller_fallback() {
        let stage = FixedStage;
        assert_eq!(
            stage
                .scan_or_default(&CUSTOM_STRING.key(), AttrValue::Str("bar".into()))
                .as_str(),
            Some("global")
        );
    }

    #[test]
    fn caller_fallback_applies_without_built_in_default() {
        let stage = EmptyStage;
        assert_eq!(
            stage
                .scan_or_default(&Attr::Terminated, AttrValue::Bool(false))
                .as_bool(),
            Some(false)
        );
    }

    #[test]
    fn self_referential_chain_stays_finite() {
        struct Cyclic;

        impl Scan for Cyclic {
            fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
                match key {
                    Attr::Parent => Some(AttrValue::Stage(StageRef::new(Arc::new(Cyclic)))),
                    _ => None,
                }
            }
        }

        assert_eq!(Cyclic.parents().count(), MAX_CHAIN_HOPS);
    }

    #[test]
    fn generic_keys_compare_by_id() {
        assert_eq!(CUSTOM_STRING.key(), GenericAttr::new("custom", "global").key());
        assert_ne!(CUSTOM_STRING.key(), GenericAttr::new("other", "global").key());
    }
}
