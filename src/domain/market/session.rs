use chrono::{DateTime, Days, NaiveTime, Timelike};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use std::fmt;

use crate::domain::errors::{BuildError, ContractError};

/// Session windows on the New-York wall clock. Asia wraps midnight.
pub const ASIA_OPEN: &str = "18:00";
pub const ASIA_CLOSE: &str = "03:00";
pub const LONDON_OPEN: &str = "03:00";
pub const LONDON_CLOSE: &str = "12:00";
pub const NEW_YORK_OPEN: &str = "08:00";
pub const NEW_YORK_CLOSE: &str = "17:00";

const TIME_LAYOUT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionName {
    Asia,
    London,
    NewYork,
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionName::Asia => write!(f, "asia"),
            SessionName::London => write!(f, "london"),
            SessionName::NewYork => write!(f, "new york"),
        }
    }
}

impl SessionName {
    fn window(&self) -> (&'static str, &'static str) {
        match self {
            SessionName::Asia => (ASIA_OPEN, ASIA_CLOSE),
            SessionName::London => (LONDON_OPEN, LONDON_CLOSE),
            SessionName::NewYork => (NEW_YORK_OPEN, NEW_YORK_CLOSE),
        }
    }
}

/// A named trading window anchored to a New-York calendar day.
///
/// `high`/`low` are live extrema, fed from candles while the session is the
/// current one and frozen once the next session takes over.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub name: SessionName,
    pub open: DateTime<Tz>,
    pub close: DateTime<Tz>,
    pub high: f64,
    pub low: f64,
    seeded: bool,
}

impl Session {
    /// Builds a session on the calendar day of `anchor`. When the close
    /// clock precedes the open clock the window wraps into the next day.
    pub fn new(
        name: SessionName,
        open: &str,
        close: &str,
        anchor: DateTime<Tz>,
    ) -> Result<Self, BuildError> {
        ensure_new_york(&anchor).map_err(|e| BuildError::TimeLayout {
            layout: anchor.to_rfc3339(),
            reason: e.to_string(),
        })?;

        let open_t = parse_clock(open)?;
        let close_t = parse_clock(close)?;

        let day = anchor.date_naive();
        let open_dt = resolve(day.and_time(open_t))?;
        let mut close_dt = resolve(day.and_time(close_t))?;
        if close_t < open_t {
            close_dt = resolve(
                day.checked_add_days(Days::new(1))
                    .ok_or_else(|| BuildError::TimeLayout {
                        layout: close.to_string(),
                        reason: "date overflow".to_string(),
                    })?
                    .and_time(close_t),
            )?;
        }

        Ok(Self {
            name,
            open: open_dt,
            close: close_dt,
            high: 0.0,
            low: 0.0,
            seeded: false,
        })
    }

    /// Builds the standard window for `name` anchored to `anchor`'s day.
    pub fn for_day(name: SessionName, anchor: DateTime<Tz>) -> Result<Self, BuildError> {
        let (open, close) = name.window();
        Session::new(name, open, close, anchor)
    }

    /// True iff `open <= now < close`.
    pub fn is_current(&self, now: DateTime<Tz>) -> Result<bool, ContractError> {
        ensure_new_york(&now)?;
        Ok(self.open <= now && now < self.close)
    }

    /// Widens the session extrema with a candle's high/low.
    pub fn absorb(&mut self, high: f64, low: f64) {
        if !self.seeded {
            self.high = high;
            self.low = low;
            self.seeded = true;
            return;
        }
        if high > self.high {
            self.high = high;
        }
        if low < self.low {
            self.low = low;
        }
    }

    /// True once at least one candle has shaped the extrema.
    pub fn has_extrema(&self) -> bool {
        self.seeded
    }
}

/// Finds the active session, probing Asia anchored to the previous day,
/// then London, NewYork, and Asia anchored to today.
pub fn current_session(now: DateTime<Tz>) -> Result<Option<Session>, ContractError> {
    ensure_new_york(&now)?;

    for session in candidate_sessions(now)? {
        if session.is_current(now)? {
            return Ok(Some(session));
        }
    }
    Ok(None)
}

/// The four candidate windows that can contain `now`, in probe order.
pub fn candidate_sessions(now: DateTime<Tz>) -> Result<Vec<Session>, ContractError> {
    ensure_new_york(&now)?;

    let yesterday = now - chrono::Duration::days(1);
    let build = |name, anchor| {
        Session::for_day(name, anchor).map_err(|e| ContractError::NotNewYork(e.to_string()))
    };
    Ok(vec![
        build(SessionName::Asia, yesterday)?,
        build(SessionName::London, now)?,
        build(SessionName::NewYork, now)?,
        build(SessionName::Asia, now)?,
    ])
}

pub fn is_market_open(now: DateTime<Tz>) -> Result<bool, ContractError> {
    Ok(current_session(now)?.is_some())
}

/// True within the 08:30–11:00 New-York high-volume window, inclusive.
pub fn in_high_volume_window(now: DateTime<Tz>) -> Result<bool, ContractError> {
    ensure_new_york(&now)?;
    let minutes = now.hour() * 60 + now.minute();
    Ok((8 * 60 + 30..=11 * 60).contains(&minutes))
}

fn ensure_new_york(t: &DateTime<Tz>) -> Result<(), ContractError> {
    if t.timezone() != New_York {
        return Err(ContractError::NotNewYork(t.to_rfc3339()));
    }
    Ok(())
}

fn parse_clock(s: &str) -> Result<NaiveTime, BuildError> {
    NaiveTime::parse_from_str(s, TIME_LAYOUT).map_err(|e| BuildError::TimeLayout {
        layout: s.to_string(),
        reason: e.to_string(),
    })
}

fn resolve(local: chrono::NaiveDateTime) -> Result<DateTime<Tz>, BuildError> {
    local
        .and_local_timezone(New_York)
        .earliest()
        .ok_or_else(|| BuildError::TimeLayout {
            layout: local.to_string(),
            reason: "nonexistent local time".to_string(),
        })
}
