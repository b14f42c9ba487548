//! Ordered fallback over locator strategies.

use crate::backend::{Backend, ElementRef, Locator};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One named way of finding a logical UI target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorStrategy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(flatten)]
    pub locator: Locator,
}

impl LocatorStrategy {
    pub fn new(locator: Locator) -> Self {
        Self {
            name: String::new(),
            locator,
        }
    }

    pub fn named(name: impl Into<String>, locator: Locator) -> Self {
        Self {
            name: name.into(),
            locator,
        }
    }

    /// Explicit name, or the locator rendered as a selector.
    pub fn name(&self) -> String {
        if self.name.is_empty() {
            self.locator.to_string()
        } else {
            self.name.clone()
        }
    }
}

impl From<Locator> for LocatorStrategy {
    fn from(locator: Locator) -> Self {
        LocatorStrategy::new(locator)
    }
}

/// What to do with the element a strategy resolves to.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    Fill(&'a str),
    Click,
}

impl Action<'_> {
    async fn apply<B: Backend + ?Sized>(
        self,
        backend: &mut B,
        element: ElementRef,
    ) -> Result<(), crate::backend::BackendError> {
        match self {
            Action::Fill(value) => backend.fill(element, value).await,
            Action::Click => backend.click(element).await,
        }
    }
}

pub struct Cascade;

impl Cascade {
    /// Try `strategies` in order and act on the first one that resolves.
    ///
    /// A strategy succeeds when its locator resolves to an element and the action
    /// completes. Lookup and action errors are swallowed and the next strategy is
    /// tried. Returns the winning strategy, or `None` once all are exhausted.
    ///
    /// The action runs as soon as a candidate resolves, so call this at most once
    /// per logical target per page state.
    pub async fn execute<'s, B: Backend + ?Sized>(
        backend: &mut B,
        strategies: &'s [LocatorStrategy],
        action: Action<'_>,
    ) -> Option<&'s LocatorStrategy> {
        for strategy in strategies {
            let element = match backend.query(&strategy.locator).await {
                Ok(Some(element)) => element,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Locator {} failed: {}", strategy.name(), e);
                    continue;
                }
            };
            match action.apply(backend, element).await {
                Ok(()) => return Some(strategy),
                Err(e) => {
                    debug!("Action via {} failed: {}", strategy.name(), e);
                }
            }
        }
        None
    }

    /// Whether any strategy currently resolves to an element. Performs no action.
    pub async fn any_present<B: Backend + ?Sized>(
        backend: &mut B,
        strategies: &[LocatorStrategy],
    ) -> Option<String> {
        for strategy in strategies {
            match backend.query(&strategy.locator).await {
                Ok(Some(_)) => return Some(strategy.name()),
                Ok(None) => {}
                Err(e) => debug!("Locator {} failed: {}", strategy.name(), e),
            }
        }
        None
    }
}
