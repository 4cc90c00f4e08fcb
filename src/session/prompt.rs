//! System instruction and opening lines sent when a channel opens.

use crate::config::Profile;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GreetingKind {
    FirstTime,
    Returning,
    /// Reconnecting after a checkpoint within the same sitting.
    Continuation,
}

pub fn build_system_instruction(profile: &Profile) -> String {
    let persona = &profile.persona;
    format!(
        "You are {agent}, a voice companion helping {author} write a first-person account \
         of their own life. Speak in {language}. Your manner is {tone}. Your job is {focus}. \
         Ask one short question at a time and let {author} do most of the talking. \
         Never invent events or put words in {author}'s mouth. When {author} interrupts, \
         stop and listen.",
        agent = profile.agent_name,
        author = profile.author_name,
        language = persona.language,
        tone = persona.tone,
        focus = persona.focus,
    )
}

/// The text turn that prompts the agent to speak first.
pub fn greeting(kind: GreetingKind, profile: &Profile) -> String {
    let author = &profile.author_name;
    match kind {
        GreetingKind::FirstTime => format!(
            "This is {author}'s first session. Introduce yourself as {agent}, explain in one \
             sentence how these conversations become pages of the manuscript, and ask where \
             they would like to begin.",
            agent = profile.agent_name,
        ),
        GreetingKind::Returning => format!(
            "{author} is back for another session. Welcome them briefly and ask what is on \
             their mind today."
        ),
        GreetingKind::Continuation => format!(
            "The previous part of this conversation was just saved. Pick up with {author} \
             exactly where you left off, without greeting them again."
        ),
    }
}

pub fn greeting_kind(returning_author: bool) -> GreetingKind {
    if returning_author {
        GreetingKind::Returning
    } else {
        GreetingKind::FirstTime
    }
}
