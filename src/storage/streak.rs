//! Daily login streaks.

use chrono::NaiveDate;

/// Login streak of one platform identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginStreak {
    /// Number of recorded logins
    pub logins: u32,
    /// Consecutive days with a login, ending at `last_login`
    pub current: u32,
    pub longest: u32,
    pub last_login: NaiveDate,
}

impl LoginStreak {
    /// Streak after the very first login.
    pub fn first(today: NaiveDate) -> Self {
        Self {
            logins: 1,
            current: 1,
            longest: 1,
            last_login: today,
        }
    }

    /// Streak after a login on `today`.
    ///
    /// Another login on the same day only counts the login. A login exactly one day
    /// later extends the streak; any longer gap starts a new one. Dates before
    /// `last_login` are treated like a same-day login.
    pub fn advance(&self, today: NaiveDate) -> Self {
        let logins = self.logins.saturating_add(1);

        match (today - self.last_login).num_days() {
            gap if gap <= 0 => Self { logins, ..*self },
            1 => {
                let current = self.current.saturating_add(1);
                Self {
                    logins,
                    current,
                    longest: self.longest.max(current),
                    last_login: today,
                }
            }
            _ => Self {
                logins,
                current: 1,
                longest: self.longest.max(1),
                last_login: today,
            },
        }
    }
}
