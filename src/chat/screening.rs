//! Keyword screening of chat text by the sender's role.
//!
//! Student messages are checked for signs of danger, counsellor messages for
//! misconduct. A hit only annotates the message; it is still stored and
//! delivered.

use std::fmt;

use regex::RegexSet;

use crate::session::Role;

const DANGER_PATTERNS: &[&str] = &[
    r"\b(raped|sexual assault|molested)\b",
    r"\b(can't see|cannot see)\b",
    r"\b(overdose|od|taken too much|too many pills|pills taken)\b",
    r"\b(help|urgent|emergency|crisis|danger|unsafe|pain|bleeding)\b",
    r"\b(dying|unconscious|choking|can't breathe|breathing difficulty)\b",
    r"\b(suicide|kill myself|ending it|end my life|can't go on|want to die)\b",
    r"\b(attacked|assaulted|stabbed|shot|injured|hurt bad)\b",
    r"\b(trap|stuck|kidnapped|abducted)\b",
];

const MEETING_PATTERNS: &[&str] = &[
    r"\b(meet up|meet in person|get together|hang out|meet somewhere|coffee|outside school|my house|my place)\b",
    r"\b(give me your address|where do you live|your home|come over|visit me)\b",
    r"\b(private meeting|secret meeting|don't tell anyone|keep this between us)\b",
];

const SUBSTANCE_PATTERNS: &[&str] = &[
    r"\b(try drugs|take drugs|use drugs|should drink|try drinking|get high|get drunk)\b",
    r"\b(alcohol helps|drugs help|weed|marijuana|cocaine|pills will help|it's just alcohol)\b",
    r"\b(drinking age|smoking age|won't hurt you|makes you feel better|no one will know)\b",
];

const PERSONAL_INFO_PATTERNS: &[&str] = &[
    r"\b(send photo|send picture|send selfie|picture of you|photo of you|selfie of you)\b",
    r"\b(what are you wearing|describe yourself|how do you look|your body)\b",
    r"\b(social media|instagram|snapchat|tiktok account|follow me|my account)\b",
    r"\b(phone number|address|where exactly|personal email|private contact)\b",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Misconduct {
    InappropriateMeeting,
    SubstanceEncouragement,
    PersonalInfoRequest,
}

impl Misconduct {
    pub fn as_str(&self) -> &'static str {
        match self {
            Misconduct::InappropriateMeeting => "inappropriate_meeting",
            Misconduct::SubstanceEncouragement => "substance_encouragement",
            Misconduct::PersonalInfoRequest => "personal_info_request",
        }
    }
}

/// Annotation attached to a screened message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Emergency,
    Misconduct(Misconduct),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Emergency => f.write_str("emergency"),
            Flag::Misconduct(kind) => write!(f, "misconduct: {}", kind.as_str()),
        }
    }
}

pub struct Screener {
    danger: RegexSet,
    /// Checked in order; the first family that matches names the flag.
    misconduct: Vec<(Misconduct, RegexSet)>,
}

impl Screener {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            danger: RegexSet::new(DANGER_PATTERNS)?,
            misconduct: vec![
                (
                    Misconduct::InappropriateMeeting,
                    RegexSet::new(MEETING_PATTERNS)?,
                ),
                (
                    Misconduct::SubstanceEncouragement,
                    RegexSet::new(SUBSTANCE_PATTERNS)?,
                ),
                (
                    Misconduct::PersonalInfoRequest,
                    RegexSet::new(PERSONAL_INFO_PATTERNS)?,
                ),
            ],
        })
    }

    /// Screens `text` written by someone in `role`.
    pub fn screen(&self, role: Role, text: &str) -> Option<Flag> {
        let lowered = text.to_lowercase();
        match role {
            Role::Student => {
                let pattern = first_match(&self.danger, &lowered)?;
                log::warn!("Danger intent matched `{pattern}`");
                Some(Flag::Emergency)
            }
            Role::Counsellor => self.misconduct.iter().find_map(|(kind, set)| {
                let pattern = first_match(set, &lowered)?;
                log::warn!("Possible {} matched `{pattern}`", kind.as_str());
                Some(Flag::Misconduct(*kind))
            }),
        }
    }
}

impl fmt::Debug for Screener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Screener")
            .field("danger_patterns", &self.danger.len())
            .field("misconduct_families", &self.misconduct.len())
            .finish()
    }
}

fn first_match<'a>(set: &'a RegexSet, text: &str) -> Option<&'a str> {
    let index = set.matches(text).iter().next()?;
    Some(set.patterns()[index].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screener() -> Screener {
        Screener::new().unwrap()
    }

    #[test]
    fn student_danger_phrases_are_emergencies() {
        let screener = screener();
        for text in [
            "I was molested last year",
            "I can't see anything",
            "I think I took an OD",
            "please HELP",
            "I can't breathe",
            "I want to die",
            "someone stabbed my friend",
            "I'm stuck in the basement",
        ] {
            assert_eq!(
                screener.screen(Role::Student, text),
                Some(Flag::Emergency),
                "{text}"
            );
        }
    }

    #[test]
    fn ordinary_student_text_is_not_flagged() {
        let screener = screener();
        assert_eq!(screener.screen(Role::Student, "exams went fine today"), None);
        // Whole words only.
        assert_eq!(screener.screen(Role::Student, "I love helping out at painting club"), None);
    }

    #[test]
    fn meeting_suggestions_are_flagged() {
        let screener = screener();
        for text in ["Want to grab coffee?", "come over after class", "keep this between us"] {
            assert_eq!(
                screener.screen(Role::Counsellor, text),
                Some(Flag::Misconduct(Misconduct::InappropriateMeeting)),
                "{text}"
            );
        }
    }

    #[test]
    fn substance_encouragement_is_flagged() {
        let screener = screener();
        for text in ["you should try drinking", "weed is fine", "no one will know"] {
            assert_eq!(
                screener.screen(Role::Counsellor, text),
                Some(Flag::Misconduct(Misconduct::SubstanceEncouragement)),
                "{text}"
            );
        }
    }

    #[test]
    fn personal_info_requests_are_flagged() {
        let screener = screener();
        for text in ["send selfie please", "what are you wearing", "what's your phone number"] {
            assert_eq!(
                screener.screen(Role::Counsellor, text),
                Some(Flag::Misconduct(Misconduct::PersonalInfoRequest)),
                "{text}"
            );
        }
    }

    #[test]
    fn first_matching_family_wins() {
        let flag = screener().screen(Role::Counsellor, "meet up and get high, send picture");
        assert_eq!(flag, Some(Flag::Misconduct(Misconduct::InappropriateMeeting)));
    }

    #[test]
    fn roles_use_their_own_checks() {
        let screener = screener();
        assert_eq!(screener.screen(Role::Counsellor, "How can I help you today?"), None);
        assert_eq!(screener.screen(Role::Student, "want to hang out?"), None);
    }

    #[test]
    fn flag_display() {
        assert_eq!(Flag::Emergency.to_string(), "emergency");
        assert_eq!(
            Flag::Misconduct(Misconduct::PersonalInfoRequest).to_string(),
            "misconduct: personal_info_request"
        );
    }
}
