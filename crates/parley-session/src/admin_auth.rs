//! Phone admin login: identity confirmation, spoken access code, lockout.
//!
//! [`AdminChallenge`] is a pure state machine; the controller feeds it caller
//! utterances and timer expiries and carries out the speech and storage work
//! it asks for.

use crate::settings::SessionSettings;
use chrono::{DateTime, Utc};
use parley_types::AdminAccess;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

const AFFIRMATIVE_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "yea", "correct", "right", "speaking", "sure", "affirmative",
    "absolutely", "definitely",
];

const AFFIRMATIVE_PHRASES: &[&str] = &["it is", "that's me", "that is me", "this is", "of course"];

const NEGATIVE_WORDS: &[&str] = &["no", "nope", "not", "nah", "wrong"];

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether an answer to "is this ...?" confirms the identity.
pub fn is_affirmative(text: &str) -> bool {
    let words = words(text);
    if words.iter().any(|w| NEGATIVE_WORDS.contains(&w.as_str())) {
        return false;
    }
    if words.iter().any(|w| AFFIRMATIVE_WORDS.contains(&w.as_str())) {
        return true;
    }
    let joined = words.join(" ");
    AFFIRMATIVE_PHRASES.iter().any(|p| joined.contains(p))
}

fn word_digit(word: &str) -> Option<char> {
    let digit = match word {
        "zero" | "oh" | "o" | "owe" => '0',
        "one" | "won" | "wan" => '1',
        "two" | "to" | "too" | "tu" => '2',
        "three" | "tree" | "free" => '3',
        "four" | "for" | "fore" => '4',
        "five" | "fife" => '5',
        "six" | "sicks" => '6',
        "seven" => '7',
        "eight" | "ate" => '8',
        "nine" | "niner" | "nein" => '9',
        _ => return None,
    };
    Some(digit)
}

/// Digits of a spoken access code.
///
/// When the transcription already contains numerals only those are used, so
/// filler words like "to" or "for" are not misread as digits.
pub fn spoken_digits(text: &str) -> String {
    let numerals: String = text.chars().filter(char::is_ascii_digit).collect();
    if !numerals.is_empty() {
        return numerals;
    }
    words(text).iter().filter_map(|w| word_digit(w)).collect()
}

/// Hashes an access code as `salt$sha256hex(salt + code)`.
pub fn hash_access_code(code: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    format!("{salt}${}", digest(&salt, code))
}

fn digest(salt: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks a code against a stored `salt$hex` hash.
pub fn verify_access_code(code: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    let actual = digest(salt, code);
    actual.len() == expected.len()
        && actual
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Counts a failed code. Returns `true` if this failure locks the record.
///
/// Failures are counted in a window starting at the first failure; a failure
/// after the window has elapsed starts a new one. Reaching the limit locks
/// the record for one window length.
pub fn register_failure(
    access: &mut AdminAccess,
    now: DateTime<Utc>,
    settings: &SessionSettings,
) -> bool {
    let window = settings.admin_failure_window();
    match access.first_failure_at {
        Some(first) if now - first <= window => access.failed_attempts += 1,
        _ => {
            access.first_failure_at = Some(now);
            access.failed_attempts = 1;
        }
    }
    if access.failed_attempts >= settings.admin_max_failures {
        access.locked_until = Some(now + window);
        return true;
    }
    false
}

/// Clears failure counters after a successful login.
pub fn reset_failures(access: &mut AdminAccess) {
    access.failed_attempts = 0;
    access.first_failure_at = None;
    access.locked_until = None;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePhase {
    ConfirmingIdentity,
    AwaitingCode { attempts: u32 },
}

/// What the controller should do after a caller utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeStep {
    /// Nothing usable was heard; keep waiting.
    Waiting,
    /// Identity confirmed; speak the prompt and wait for the code.
    AskForCode(String),
    /// The caller is not the admin.
    NotAdmin,
    /// A code was spoken and must be verified.
    CodeSpoken(String),
}

/// In-progress admin login for one call.
#[derive(Debug, Clone)]
pub struct AdminChallenge {
    access: AdminAccess,
    phase: ChallengePhase,
    deadline: Instant,
}

impl AdminChallenge {
    pub fn begin(access: AdminAccess, now: Instant, settings: &SessionSettings) -> Self {
        Self {
            access,
            phase: ChallengePhase::ConfirmingIdentity,
            deadline: now + settings.identity_confirm_timeout(),
        }
    }

    pub fn access(&self) -> &AdminAccess {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut AdminAccess {
        &mut self.access
    }

    pub fn phase(&self) -> ChallengePhase {
        self.phase
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn identity_question(&self) -> String {
        format!("Hi, is this {}?", self.access.display_name)
    }

    /// Whether caller speech is expected to be an access code.
    pub fn expects_code(&self) -> bool {
        matches!(self.phase, ChallengePhase::AwaitingCode { .. })
    }

    pub fn on_caller_text(
        &mut self,
        text: &str,
        now: Instant,
        settings: &SessionSettings,
    ) -> ChallengeStep {
        match self.phase {
            ChallengePhase::ConfirmingIdentity => {
                if is_affirmative(text) {
                    self.phase = ChallengePhase::AwaitingCode { attempts: 0 };
                    self.deadline = now + settings.access_code_timeout();
                    ChallengeStep::AskForCode("Please say your access code.".to_string())
                } else {
                    ChallengeStep::NotAdmin
                }
            }
            ChallengePhase::AwaitingCode { .. } => {
                let digits = spoken_digits(text);
                if digits.is_empty() {
                    ChallengeStep::Waiting
                } else {
                    ChallengeStep::CodeSpoken(digits)
                }
            }
        }
    }

    /// Counts a wrong code against this call. Returns `true` if the caller
    /// may try again.
    pub fn retry(&mut self, now: Instant, settings: &SessionSettings) -> bool {
        let attempts = match self.phase {
            ChallengePhase::AwaitingCode { attempts } => attempts + 1,
            ChallengePhase::ConfirmingIdentity => return false,
        };
        self.phase = ChallengePhase::AwaitingCode { attempts };
        if attempts >= settings.admin_code_attempts_per_call {
            return false;
        }
        self.deadline = now + settings.access_code_timeout();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn access() -> AdminAccess {
        AdminAccess {
            id: "a-1".into(),
            tenant_id: "t".into(),
            phone_number: "+15550100".into(),
            display_name: "Morgan".into(),
            code_hash: hash_access_code("4821"),
            failed_attempts: 0,
            first_failure_at: None,
            locked_until: None,
        }
    }

    #[test]
    fn homophones_normalise_to_digits() {
        assert_eq!(spoken_digits("four eight too won"), "4821");
        assert_eq!(spoken_digits("Oh, niner, ate, tree."), "0983");
        assert_eq!(spoken_digits("it's 48 21"), "4821");
        assert_eq!(spoken_digits("umm hold on"), "");
    }

    #[test]
    fn affirmatives_are_detected() {
        assert!(is_affirmative("Yeah, that's me"));
        assert!(is_affirmative("Speaking."));
        assert!(!is_affirmative("No, this is their assistant"));
        assert!(!is_affirmative("Who's asking?"));
    }

    #[test]
    fn codes_verify_against_salted_hash() {
        let stored = hash_access_code("4821");
        assert!(verify_access_code("4821", &stored));
        assert!(!verify_access_code("4822", &stored));
        assert!(!verify_access_code("4821", "nosalt"));
        assert_ne!(stored, hash_access_code("4821"));
    }

    #[test]
    fn fifth_failure_in_window_locks() {
        let settings = SessionSettings::default();
        let mut a = access();
        let start = Utc::now();
        for i in 0..4 {
            assert!(!register_failure(&mut a, start + chrono::Duration::minutes(i), &settings));
        }
        assert!(register_failure(&mut a, start + chrono::Duration::minutes(5), &settings));
        assert!(a.is_locked(start + chrono::Duration::minutes(6)));
        assert!(!a.is_locked(start + chrono::Duration::minutes(21)));
    }

    #[test]
    fn failures_outside_window_start_over() {
        let settings = SessionSettings::default();
        let mut a = access();
        let start = Utc::now();
        for _ in 0..4 {
            register_failure(&mut a, start, &settings);
        }
        assert!(!register_failure(&mut a, start + chrono::Duration::minutes(16), &settings));
        assert_eq!(a.failed_attempts, 1);
        reset_failures(&mut a);
        assert_eq!(a.first_failure_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_walks_through_phases() {
        let settings = SessionSettings::default();
        let now = Instant::now();
        let mut c = AdminChallenge::begin(access(), now, &settings);
        assert_eq!(c.identity_question(), "Hi, is this Morgan?");
        assert_eq!(c.deadline(), now + Duration::from_secs(10));

        let later = now + Duration::from_secs(2);
        assert!(matches!(
            c.on_caller_text("yes", later, &settings),
            ChallengeStep::AskForCode(_)
        ));
        assert_eq!(c.deadline(), later + Duration::from_secs(15));
        assert_eq!(c.on_caller_text("hmm", later, &settings), ChallengeStep::Waiting);
        assert_eq!(
            c.on_caller_text("four eight two one", later, &settings),
            ChallengeStep::CodeSpoken("4821".into())
        );

        assert!(c.retry(later, &settings));
        assert!(c.retry(later, &settings));
        assert!(!c.retry(later, &settings));
    }

    #[tokio::test(start_paused = true)]
    async fn denial_ends_challenge() {
        let settings = SessionSettings::default();
        let mut c = AdminChallenge::begin(access(), Instant::now(), &settings);
        assert_eq!(
            c.on_caller_text("no, wrong number", Instant::now(), &settings),
            ChallengeStep::NotAdmin
        );
    }
}
