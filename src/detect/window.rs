//! Date-bounded searches over a folder's UID universe

use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::store::{MailStore, SearchQuery, UidSet};
use chrono::NaiveDate;
use tracing::debug;

/// Which side of the window start a [`FilterWindowQuery`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Messages older than the window: soft-delete candidates.
    Before,
    /// Messages inside the window: window widening.
    Since,
}

/// A date-bounded search restricted to (or away from) a UID set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterWindowQuery {
    window_start: NaiveDate,
    mode: WindowMode,
    uids: UidSet,
    exclude: bool,
}

impl FilterWindowQuery {
    /// Search among `uids`.
    #[must_use]
    pub const fn within(window_start: NaiveDate, mode: WindowMode, uids: UidSet) -> Self {
        Self {
            window_start,
            mode,
            uids,
            exclude: false,
        }
    }

    /// Search among every message except `uids`.
    #[must_use]
    pub const fn excluding(window_start: NaiveDate, mode: WindowMode, uids: UidSet) -> Self {
        Self {
            window_start,
            mode,
            uids,
            exclude: true,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> WindowMode {
        self.mode
    }

    #[must_use]
    pub fn to_search(&self) -> SearchQuery {
        let query = match self.mode {
            WindowMode::Before => SearchQuery::all().before(self.window_start),
            WindowMode::Since => SearchQuery::all().since(self.window_start),
        };
        if self.exclude {
            query.excluding(self.uids.clone())
        } else {
            query.within(self.uids.clone())
        }
    }

    /// Run the search. No match is an empty set, never an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderGone`] if the mailbox no longer exists, or
    /// [`Error::StoreUnavailable`] if the search could not be run.
    pub async fn run<S: MailStore>(&self, store: &mut S, mailbox: &Mailbox) -> Result<UidSet> {
        let query = self.to_search();
        if query.matches_nothing() {
            return Ok(UidSet::new());
        }
        let result = store
            .search(mailbox, &query)
            .await
            .map_err(|e| Error::store("search", mailbox.as_str(), e))?;
        debug!(
            "{}: {:?} window search from {} matched {}",
            mailbox,
            self.mode,
            self.window_start,
            result.count()
        );
        Ok(result.matched)
    }
}
