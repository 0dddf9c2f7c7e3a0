//! Replies for when the user pushes back: complaints about the companion
//! itself, and corrections of the last reflection.

use super::rotator::Rotator;
use crate::patterns::RejectionKind;

/// Two apology variants, alternated so a second complaint does not get the
/// same answer.
pub const COMPLAINT_REPLIES: [&str; 2] = [
    "I'm sorry, I've been repeating myself. Let's do something different: would you like a grounding exercise, a small practical step, or to talk about something else?",
    "I'm sorry about that, you've already told me a lot. We could try a short grounding exercise, pick one small practical step, or switch to something else entirely. Which sounds better?",
];

const EXPLICIT_REPAIRS: &[&str] = &[
    "Thanks for correcting me. I don't want to put words in your mouth. How would you describe it in your own words?",
    "Okay, I got that wrong. What is it actually like for you?",
];

const IMPLICIT_REPAIRS: &[&str] = &[
    "It sounds like that only partly fits. What part of it feels closer to the truth for you?",
    "Maybe I only caught a piece of it. What would you add or change?",
];

pub fn complaint_reply(complaints_so_far: u32) -> &'static str {
    COMPLAINT_REPLIES[(complaints_so_far % 2) as usize]
}

pub fn rejection_reply(kind: RejectionKind, rotator: &mut Rotator, recent: &[String]) -> String {
    let bank = match kind {
        RejectionKind::Explicit => EXPLICIT_REPAIRS,
        RejectionKind::Implicit => IMPLICIT_REPAIRS,
    };
    rotator.pick(bank, recent).unwrap_or(bank[0]).to_string()
}
