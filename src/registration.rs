//! Registration Conversation State Machine
//!
//! Collects phone number, display name and product tier from a new user, one
//! step at a time. Conversation state is EPHEMERAL: it lives in memory only and
//! is discarded on completion, cancellation or restart.
//!
//! ```text
//! (none) --start--> AwaitingPhone --phone--> AwaitingName --name--> AwaitingTier --tier--> complete
//!                        |                        |                      |
//!                        +--------cancel----------+--------cancel--------+--> (none)
//! ```

use crate::error::RelayError;
use crate::telegram::traits::{MessageContent, UserId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Label of the cancel button shown during registration.
pub const CANCEL_LABEL: &str = "❌ Cancel";

/// Names shorter than this (after trimming) are rejected.
pub const MIN_NAME_CHARS: usize = 2;

/// Product access tier chosen at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Basic,
    Silver,
    Gold,
    Vip,
}

impl Tier {
    /// Every tier, in display order.
    pub const ALL: [Tier; 4] = [Tier::Basic, Tier::Silver, Tier::Gold, Tier::Vip];

    /// Button label; the user's reply must match it exactly.
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Basic => "Basic",
            Tier::Silver => "Silver",
            Tier::Gold => "Gold",
            Tier::Vip => "VIP",
        }
    }

    /// Storage key.
    pub fn key(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Vip => "vip",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.label() == label)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.key() == key)
    }

    pub fn labels() -> Vec<String> {
        Self::ALL.iter().map(|tier| tier.label().to_string()).collect()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Current step of a conversation, carrying what has been collected so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    AwaitingPhone,
    AwaitingName { phone: String },
    AwaitingTier { phone: String, name: String },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::AwaitingPhone => StepKind::AwaitingPhone,
            Step::AwaitingName { .. } => StepKind::AwaitingName,
            Step::AwaitingTier { .. } => StepKind::AwaitingTier,
        }
    }

    /// Prompt asking for this step's input.
    fn prompt(&self) -> Prompt {
        match self {
            Step::AwaitingPhone => Prompt::SharePhone,
            Step::AwaitingName { .. } => Prompt::EnterName,
            Step::AwaitingTier { .. } => Prompt::ChooseTier,
        }
    }

    /// Prompt re-asking after input this step cannot use.
    fn reprompt(&self) -> Prompt {
        match self {
            Step::AwaitingPhone => Prompt::PhoneRequired,
            Step::AwaitingName { .. } => Prompt::NameTooShort,
            Step::AwaitingTier { .. } => Prompt::InvalidTier,
        }
    }
}

/// Step without its data, ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    AwaitingPhone,
    AwaitingName,
    AwaitingTier,
    Complete,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::AwaitingPhone => "awaiting_phone",
            StepKind::AwaitingName => "awaiting_name",
            StepKind::AwaitingTier => "awaiting_product_tier",
            StepKind::Complete => "complete",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the machine, derived from one inbound private message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// `/start` (with or without payload)
    Start,
    /// User shared their own contact card
    PhoneShared(String),
    /// Plain text
    Text(String),
    /// `/cancel` or the cancel button
    Cancel,
    /// Anything else: other commands, media, someone else's contact
    Other,
}

impl RegistrationEvent {
    /// Classify a private message from `sender`.
    pub fn from_content(sender: UserId, content: &MessageContent) -> Self {
        match content {
            MessageContent::Contact {
                phone_number,
                user_id,
            } => {
                if *user_id == Some(sender) {
                    RegistrationEvent::PhoneShared(phone_number.clone())
                } else {
                    RegistrationEvent::Other
                }
            }
            MessageContent::Text(text) => {
                let trimmed = text.trim();
                if trimmed == CANCEL_LABEL {
                    return RegistrationEvent::Cancel;
                }
                match command_name(trimmed) {
                    Some("start") => RegistrationEvent::Start,
                    Some("cancel") => RegistrationEvent::Cancel,
                    Some(_) => RegistrationEvent::Other,
                    None => RegistrationEvent::Text(text.clone()),
                }
            }
            MessageContent::Other => RegistrationEvent::Other,
        }
    }
}

/// `"/start@relay_bot abc"` -> `Some("start")`
fn command_name(text: &str) -> Option<&str> {
    let first = text.strip_prefix('/')?.split_whitespace().next()?;
    Some(first.split('@').next().unwrap_or(first))
}

/// Profile collected by a finished conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProfile {
    pub phone_number: String,
    pub name: String,
    pub tier: Tier,
}

/// What to ask the user next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Ask for the phone number (contact button + cancel button)
    SharePhone,
    /// Input was not the user's own contact card
    PhoneRequired,
    EnterName,
    NameTooShort,
    /// Present the tier choices
    ChooseTier,
    InvalidTier,
    /// Registration finished; the caller persists the profile
    Complete,
    Cancelled,
    /// Cancel with no conversation in progress
    NothingToCancel,
}

/// How the conversation state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// New conversation at `awaiting_phone`
    Started,
    Moved { from: StepKind, to: StepKind },
    /// Input rejected or repeated `/start`; step unchanged
    Unchanged(StepKind),
    Completed(CompletedProfile),
    Cancelled { from: StepKind },
    /// No conversation and none started
    Idle,
}

/// Result of feeding one event to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub prompt: Prompt,
    pub transition: Transition,
}

impl Advance {
    fn new(prompt: Prompt, transition: Transition) -> Self {
        Self { prompt, transition }
    }

    /// The collected profile, when this event finished the conversation.
    pub fn completed(&self) -> Option<&CompletedProfile> {
        match &self.transition {
            Transition::Completed(profile) => Some(profile),
            _ => None,
        }
    }

    /// Why the input was rejected, when this event re-prompted.
    pub fn rejection(&self) -> Option<RelayError> {
        let reason = match self.prompt {
            Prompt::PhoneRequired => "expected the sender's own contact card".to_string(),
            Prompt::NameTooShort => format!("name shorter than {MIN_NAME_CHARS} characters"),
            Prompt::InvalidTier => "not one of the tier options".to_string(),
            _ => return None,
        };
        Some(RelayError::Validation(reason))
    }
}

/// Pure transition function.
///
/// Returns the next step (`None` once the conversation is over) and what to
/// tell the user.
pub fn transition(step: Option<Step>, event: RegistrationEvent) -> (Option<Step>, Advance) {
    let Some(step) = step else {
        return match event {
            RegistrationEvent::Cancel => (
                None,
                Advance::new(Prompt::NothingToCancel, Transition::Idle),
            ),
            _ => (
                Some(Step::AwaitingPhone),
                Advance::new(Prompt::SharePhone, Transition::Started),
            ),
        };
    };

    let from = step.kind();

    match (step, event) {
        (_, RegistrationEvent::Cancel) => (
            None,
            Advance::new(Prompt::Cancelled, Transition::Cancelled { from }),
        ),

        (step, RegistrationEvent::Start) => {
            let prompt = step.prompt();
            (Some(step), Advance::new(prompt, Transition::Unchanged(from)))
        }

        (Step::AwaitingPhone, RegistrationEvent::PhoneShared(phone)) => (
            Some(Step::AwaitingName { phone }),
            Advance::new(
                Prompt::EnterName,
                Transition::Moved {
                    from,
                    to: StepKind::AwaitingName,
                },
            ),
        ),

        (Step::AwaitingName { phone }, RegistrationEvent::Text(text)) => {
            let name = text.trim();
            if name.chars().count() < MIN_NAME_CHARS {
                return (
                    Some(Step::AwaitingName { phone }),
                    Advance::new(Prompt::NameTooShort, Transition::Unchanged(from)),
                );
            }
            (
                Some(Step::AwaitingTier {
                    phone,
                    name: name.to_string(),
                }),
                Advance::new(
                    Prompt::ChooseTier,
                    Transition::Moved {
                        from,
                        to: StepKind::AwaitingTier,
                    },
                ),
            )
        }

        (Step::AwaitingTier { phone, name }, RegistrationEvent::Text(text)) => {
            match Tier::from_label(&text) {
                Some(tier) => (
                    None,
                    Advance::new(
                        Prompt::Complete,
                        Transition::Completed(CompletedProfile {
                            phone_number: phone,
                            name,
                            tier,
                        }),
                    ),
                ),
                None => (
                    Some(Step::AwaitingTier { phone, name }),
                    Advance::new(Prompt::InvalidTier, Transition::Unchanged(from)),
                ),
            }
        }

        (step, _) => {
            let prompt = step.reprompt();
            (Some(step), Advance::new(prompt, Transition::Unchanged(from)))
        }
    }
}

/// In-memory conversation registry.
///
/// The lock is never held across an await point.
#[derive(Default)]
pub struct RegistrationMachine {
    sessions: Mutex<HashMap<UserId, Step>>,
}

impl RegistrationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event for `user`.
    pub fn advance(&self, user: UserId, event: RegistrationEvent) -> Advance {
        let mut sessions = self.lock();
        let current = sessions.remove(&user);
        let (next, advance) = transition(current, event);

        if let Some(next) = next {
            sessions.insert(user, next);
        }
        drop(sessions);

        match &advance.transition {
            Transition::Started => info!(user = %user, "Registration started"),
            Transition::Moved { from, to } => {
                debug!(user = %user, from = %from, to = %to, "Registration advanced")
            }
            Transition::Unchanged(step) => match advance.rejection() {
                Some(e) => debug!(user = %user, step = %step, error = %e, "Registration input rejected"),
                None => debug!(user = %user, step = %step, "Registration prompt repeated"),
            },
            Transition::Completed(profile) => {
                info!(user = %user, tier = %profile.tier, "Registration completed")
            }
            Transition::Cancelled { from } => info!(user = %user, from = %from, "Registration cancelled"),
            Transition::Idle => {}
        }

        advance
    }

    /// True while `user` has a conversation in progress.
    pub fn is_active(&self, user: UserId) -> bool {
        self.lock().contains_key(&user)
    }

    pub fn step(&self, user: UserId) -> Option<Step> {
        self.lock().get(&user).cloned()
    }

    /// Number of conversations in progress.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Step>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use proptest::test_runner::{Config as ProptestConfig, RngAlgorithm, TestRng, TestRunner};

    const PROPTEST_SEED: &[u8; 32] = b"relaybot-registration-proptest!!";

    fn runner() -> TestRunner {
        let config = ProptestConfig {
            rng_algorithm: RngAlgorithm::ChaCha,
            ..Default::default()
        };
        TestRunner::new_with_rng(config, TestRng::from_seed(RngAlgorithm::ChaCha, PROPTEST_SEED))
    }

    fn event_strategy() -> impl Strategy<Value = RegistrationEvent> {
        prop_oneof![
            Just(RegistrationEvent::Start),
            Just(RegistrationEvent::Cancel),
            Just(RegistrationEvent::Other),
            "\\+[0-9]{3,12}".prop_map(RegistrationEvent::PhoneShared),
            ".{0,12}".prop_map(RegistrationEvent::Text),
            prop::sample::select(vec!["Basic", "Silver", "Gold", "VIP"])
                .prop_map(|label| RegistrationEvent::Text(label.to_string())),
        ]
    }

    /// Property: a never-seen identity always lands at awaiting_phone
    #[test]
    fn prop_first_contact_is_awaiting_phone() {
        runner()
            .run(&event_strategy(), |event| {
                let is_cancel = event == RegistrationEvent::Cancel;
                let (next, _) = transition(None, event);
                if is_cancel {
                    prop_assert_eq!(next, None);
                } else {
                    prop_assert_eq!(next, Some(Step::AwaitingPhone));
                }
                Ok(())
            })
            .unwrap();
    }

    /// Property: names shorter than two characters never leave awaiting_name
    #[test]
    fn prop_short_names_stay_awaiting_name() {
        runner()
            .run(&("\\s{0,3}", ".?", "\\s{0,3}"), |(pre, core, post)| {
                let step = Step::AwaitingName {
                    phone: "+100".to_string(),
                };
                let input = format!("{pre}{core}{post}");
                prop_assume!(input.trim().chars().count() < MIN_NAME_CHARS);

                let (next, advance) = transition(Some(step.clone()), RegistrationEvent::Text(input));
                prop_assert_eq!(next, Some(step));
                prop_assert_eq!(advance.prompt, Prompt::NameTooShort);
                Ok(())
            })
            .unwrap();
    }

    /// Property: any text that is not a tier label keeps awaiting_product_tier
    #[test]
    fn prop_unknown_tier_stays_awaiting_tier() {
        runner()
            .run(&".{0,10}", |input| {
                prop_assume!(Tier::from_label(&input).is_none());
                let step = Step::AwaitingTier {
                    phone: "+100".to_string(),
                    name: "Ana".to_string(),
                };

                let (next, advance) = transition(Some(step.clone()), RegistrationEvent::Text(input));
                prop_assert_eq!(next, Some(step));
                prop_assert_eq!(advance.prompt, Prompt::InvalidTier);
                Ok(())
            })
            .unwrap();
    }

    /// Property: steps only move forward, except through cancellation
    #[test]
    fn prop_steps_are_monotonic() {
        runner()
            .run(&prop::collection::vec(event_strategy(), 1..30), |events| {
                let mut step: Option<Step> = None;
                for event in events {
                    let before = step.as_ref().map(|s| s.kind());
                    let (next, advance) = transition(step, event);

                    match (&before, &next, &advance.transition) {
                        (Some(_), None, Transition::Cancelled { .. }) => {}
                        (Some(_), None, Transition::Completed(_)) => {}
                        (Some(from), Some(to), _) => prop_assert!(to.kind() >= *from),
                        (None, _, _) => {}
                        (Some(_), None, other) => {
                            prop_assert!(false, "conversation ended by {:?}", other)
                        }
                    }
                    step = next;
                }
                Ok(())
            })
            .unwrap();
    }

    /// Property: a completed profile holds exactly the collected values
    #[test]
    fn prop_completion_carries_collected_values() {
        let strategy = (
            "\\+[0-9]{3,12}",
            "[A-Za-z]{2,16}",
            prop::sample::select(Tier::ALL.to_vec()),
        );
        runner()
            .run(&strategy, |(phone, name, tier)| {
                let machine = RegistrationMachine::new();
                let user = UserId(1);
                machine.advance(user, RegistrationEvent::Start);
                machine.advance(user, RegistrationEvent::PhoneShared(phone.clone()));
                machine.advance(user, RegistrationEvent::Text(name.clone()));
                let advance = machine.advance(user, RegistrationEvent::Text(tier.label().to_string()));

                let expected = CompletedProfile {
                    phone_number: phone,
                    name,
                    tier,
                };
                prop_assert_eq!(advance.completed(), Some(&expected));
                prop_assert!(!machine.is_active(user));
                Ok(())
            })
            .unwrap();
    }
}
