//! Human-readable scheduling windows.
//!
//! ```text
//! spec    := [ "on" days ] [ hours ]
//! days    := "weekday" | "weekend" | item ( "," item )*
//! item    := day [ "-" day ]
//! hours   := "before" hour | "after" hour | "between" hour "and" hour
//! hour    := number [ "am" | "pm" ]
//! ```
//!
//! Day ranges wrap around the end of the week: `fri-mon` is Friday,
//! Saturday, Sunday and Monday. Days are numbered from Sunday = 0.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{JobError, JobResult};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A window of days of the week and hours of the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Periodic {
    /// Allowed days, Sunday = 0, in the order they were written.
    pub days_of_week: Vec<u32>,
    /// First allowed hour, inclusive.
    pub after_hour: u32,
    /// End of the allowed hours, exclusive.
    pub before_hour: u32,
    /// Whether an `on` clause was given.
    pub explicit_days: bool,
}

impl Default for Periodic {
    fn default() -> Self {
        Self {
            days_of_week: (0..7).collect(),
            after_hour: 0,
            before_hour: 24,
            explicit_days: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Number(u32),
    Comma,
    Dash,
}

fn malformed(input: &str, reason: impl fmt::Display) -> JobError {
    JobError::MalformedTrigger(format!("invalid periodic spec {input:?}: {reason}"))
}

fn lex(input: &str) -> JobResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == ',' {
            chars.next();
            tokens.push(Token::Comma);
        } else if c == '-' {
            chars.next();
            tokens.push(Token::Dash);
        } else if c.is_ascii_digit() {
            let mut n: u32 = 0;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                n = n
                    .checked_mul(10)
                    .and_then(|n| n.checked_add(d))
                    .ok_or_else(|| malformed(input, "number too large"))?;
                chars.next();
            }
            tokens.push(Token::Number(n));
        } else if c.is_alphabetic() {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_alphabetic() {
                    break;
                }
                word.extend(c.to_lowercase());
                chars.next();
            }
            tokens.push(Token::Word(word));
        } else {
            return Err(malformed(input, format!("unexpected character {c:?}")));
        }
    }
    Ok(tokens)
}

fn day_index(word: &str) -> Option<u32> {
    let day = match word {
        "sun" | "sunday" => 0,
        "mon" | "monday" => 1,
        "tue" | "tues" | "tuesday" => 2,
        "wed" | "wednesday" => 3,
        "thu" | "thurs" | "thursday" => 4,
        "fri" | "friday" => 5,
        "sat" | "saturday" => 6,
        _ => return word.strip_suffix('s').filter(|w| w.len() > 3).and_then(day_index),
    };
    Some(day)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == word)
    }

    fn expect_word(&mut self, word: &str) -> JobResult<()> {
        match self.next() {
            Some(Token::Word(w)) if w == word => Ok(()),
            other => Err(malformed(self.input, format!("expected {word:?}, got {other:?}"))),
        }
    }

    fn day(&mut self) -> JobResult<u32> {
        match self.next() {
            Some(Token::Word(w)) => {
                day_index(&w).ok_or_else(|| malformed(self.input, format!("unknown day {w:?}")))
            }
            other => Err(malformed(self.input, format!("expected a day, got {other:?}"))),
        }
    }

    fn days(&mut self) -> JobResult<Vec<u32>> {
        if self.peek_word("weekday") || self.peek_word("weekdays") {
            self.next();
            return Ok(vec![1, 2, 3, 4, 5]);
        }
        if self.peek_word("weekend") || self.peek_word("weekends") {
            self.next();
            return Ok(vec![0, 6]);
        }

        let mut days = Vec::new();
        loop {
            let start = self.day()?;
            if self.peek() == Some(&Token::Dash) {
                self.next();
                let end = self.day()?;
                let mut d = start;
                loop {
                    days.push(d);
                    if d == end {
                        break;
                    }
                    d = (d + 1) % 7;
                }
            } else {
                days.push(start);
            }
            if self.peek() == Some(&Token::Comma) {
                self.next();
            } else {
                break;
            }
        }

        let mut seen = [false; 7];
        days.retain(|&d| !std::mem::replace(&mut seen[d as usize], true));
        Ok(days)
    }

    /// An hour of the day. As an exclusive upper bound, midnight is 24.
    fn hour(&mut self, upper: bool) -> JobResult<u32> {
        let n = match self.next() {
            Some(Token::Number(n)) => n,
            other => return Err(malformed(self.input, format!("expected an hour, got {other:?}"))),
        };
        let meridiem = match self.peek() {
            Some(Token::Word(w)) if w == "am" || w == "pm" => {
                let pm = w == "pm";
                self.next();
                Some(pm)
            }
            _ => None,
        };
        let hour = match meridiem {
            Some(pm) => {
                if !(1..=12).contains(&n) {
                    return Err(malformed(self.input, format!("invalid hour {n}")));
                }
                match (n, pm) {
                    (12, false) => 0,
                    (12, true) => 12,
                    (n, false) => n,
                    (n, true) => n + 12,
                }
            }
            None if n <= 24 => n,
            None => return Err(malformed(self.input, format!("invalid hour {n}"))),
        };
        Ok(if upper && hour == 0 { 24 } else { hour })
    }

    fn parse(mut self) -> JobResult<Periodic> {
        let mut spec = Periodic::default();
        if self.peek_word("on") {
            self.next();
            spec.days_of_week = self.days()?;
            spec.explicit_days = true;
        }

        match self.next() {
            None => return Ok(spec),
            Some(Token::Word(w)) if w == "before" => {
                spec.before_hour = self.hour(true)?;
            }
            Some(Token::Word(w)) if w == "after" => {
                spec.after_hour = self.hour(false)?;
            }
            Some(Token::Word(w)) if w == "between" => {
                spec.after_hour = self.hour(false)?;
                self.expect_word("and")?;
                spec.before_hour = self.hour(true)?;
            }
            Some(other) => {
                return Err(malformed(self.input, format!("unexpected {other:?}")));
            }
        }

        if let Some(extra) = self.peek() {
            return Err(malformed(self.input, format!("trailing {extra:?}")));
        }
        if spec.after_hour >= spec.before_hour {
            return Err(malformed(self.input, "the window of hours is empty"));
        }
        Ok(spec)
    }
}

/// Parse a periodic spec such as `"on monday between 8am and 6pm"`.
pub fn parse_periodic(input: &str) -> JobResult<Periodic> {
    let parser = Parser {
        input,
        tokens: lex(input)?,
        pos: 0,
    };
    parser.parse()
}

/// Frequency of a periodic cron shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// `@hourly`
    Hourly,
    /// `@daily`
    Daily,
    /// `@weekly`
    Weekly,
    /// `@monthly`
    Monthly,
}

impl FromStr for Frequency {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "@hourly" => Ok(Self::Hourly),
            "@daily" => Ok(Self::Daily),
            "@weekly" => Ok(Self::Weekly),
            "@monthly" => Ok(Self::Monthly),
            other => Err(JobError::MalformedTrigger(format!("unknown frequency {other:?}"))),
        }
    }
}

impl Periodic {
    /// Pick a concrete six-field crontab inside the window.
    ///
    /// The free fields are drawn from `seed`, so one trigger always gets the
    /// same schedule while many triggers spread over the window.
    pub fn to_random_crontab(&self, frequency: Frequency, seed: u64) -> JobResult<String> {
        if frequency == Frequency::Monthly && self.explicit_days {
            return Err(JobError::MalformedTrigger(
                "@monthly cannot be restricted to days of the week".to_string(),
            ));
        }
        if self.days_of_week.is_empty() || self.after_hour >= self.before_hour {
            return Err(JobError::MalformedTrigger("empty periodic window".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let second = rng.random_range(0..60);
        let minute = rng.random_range(0..60);
        let hour = rng.random_range(self.after_hour..self.before_hour);
        let days = if self.days_of_week.len() == 7 {
            "*".to_string()
        } else {
            let mut sorted = self.days_of_week.clone();
            sorted.sort_unstable();
            sorted
                .iter()
                .map(|&d| DAY_NAMES[d as usize])
                .collect::<Vec<_>>()
                .join(",")
        };

        let crontab = match frequency {
            Frequency::Hourly => {
                let hours = if self.after_hour == 0 && self.before_hour == 24 {
                    "*".to_string()
                } else {
                    format!("{}-{}", self.after_hour, self.before_hour - 1)
                };
                format!("{second} {minute} {hours} * * {days}")
            }
            Frequency::Daily => format!("{second} {minute} {hour} * * {days}"),
            Frequency::Weekly => {
                let day = self.days_of_week[rng.random_range(0..self.days_of_week.len())];
                format!("{second} {minute} {hour} * * {}", DAY_NAMES[day as usize])
            }
            Frequency::Monthly => {
                let day_of_month = rng.random_range(1..=28);
                format!("{second} {minute} {hour} {day_of_month} * *")
            }
        };
        Ok(crontab)
    }
}

/// Stable 64-bit seed of a string (FNV-1a).
pub fn seed_from_id(id: &str) -> u64 {
    id.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}
