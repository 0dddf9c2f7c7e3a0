use hearth_backend::memory::rehydrate::{RehydratedContext, SessionStatus};
use hearth_backend::persistence::ConversationMeta;
use hearth_backend::session::{ConversationState, TurnResult};

/// The companion's reply, prefixed with the glyph when one was chosen.
pub fn render_reply(result: &TurnResult) -> String {
    let mut out = match &result.glyph {
        Some(glyph) => format!("{} {}\n  {}", glyph.symbol, glyph.name, result.reply),
        None => format!("  {}", result.reply),
    };
    if let Some(reflection) = &result.reflection {
        out.push_str("\n  ");
        out.push_str(reflection);
    }
    out
}

pub fn render_greeting(context: &RehydratedContext) -> String {
    match context.status {
        SessionStatus::NewSession => {
            "Welcome. This is a quiet place to talk. How are you feeling?".to_string()
        }
        SessionStatus::Returning => format!("Welcome back. {}", context.narrative),
    }
}

pub fn render_conversation_list(conversations: &[ConversationMeta], current: &str) -> String {
    if conversations.is_empty() {
        return "No saved conversations yet.".to_string();
    }
    conversations
        .iter()
        .enumerate()
        .map(|(i, conv)| {
            let marker = if conv.conversation_id == current { "*" } else { " " };
            let title = if conv.title.is_empty() {
                "(untitled)"
            } else {
                conv.title.as_str()
            };
            format!(
                "{marker}{:>2}. {} ({} message{}, {})",
                i + 1,
                title,
                conv.message_count,
                if conv.message_count == 1 { "" } else { "s" },
                conv.updated_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_state(state: &ConversationState) -> String {
    let themes: Vec<String> = state
        .top_themes
        .iter()
        .map(|t| format!("{} x{}", t.theme.label(), t.count))
        .collect();
    format!(
        "{} turn(s), mood {:?} ({:.2}), state confidence {:.2}, themes: {}",
        state.turn_count,
        state.agent.primary_mood,
        state.agent.mood_intensity,
        state.integrated_state.confidence,
        if themes.is_empty() {
            "none".to_string()
        } else {
            themes.join(", ")
        }
    )
}

pub fn render_help() -> &'static str {
    "Commands: /list, /switch <n>, /new, /rename <title>, /delete, /state, /history on|off, /help, /quit"
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hearth_backend::affect::AffectParser;
    use hearth_backend::composer::ResponseClass;
    use hearth_backend::persistence::ProcessingMode;
    use hearth_backend::session::GlyphRef;

    fn result(glyph: Option<GlyphRef>, reflection: Option<&str>) -> TurnResult {
        TurnResult {
            reply: "That sounds heavy.".to_string(),
            glyph,
            affect: AffectParser::new().analyze("I'm tired"),
            processing_time_ms: 2.0,
            response_class: ResponseClass::GlyphGrounded,
            reflection: reflection.map(str::to_string),
            turn: 1,
        }
    }

    #[test]
    fn glyph_is_shown_above_the_reply() {
        let out = render_reply(&result(
            Some(GlyphRef {
                name: "Still Water".to_string(),
                symbol: "~".to_string(),
            }),
            Some("I've noticed work has come up a couple of times."),
        ));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "~ Still Water");
        assert_eq!(lines[1], "  That sounds heavy.");
        assert_eq!(lines.len(), 3);
        assert_eq!(render_reply(&result(None, None)), "  That sounds heavy.");
    }

    #[test]
    fn list_marks_the_current_conversation() {
        let conversations = vec![
            ConversationMeta {
                conversation_id: "a".to_string(),
                title: "Monday".to_string(),
                updated_at: Utc::now(),
                message_count: 1,
                processing_mode: ProcessingMode::Local,
            },
            ConversationMeta {
                conversation_id: "b".to_string(),
                title: String::new(),
                updated_at: Utc::now(),
                message_count: 4,
                processing_mode: ProcessingMode::Local,
            },
        ];
        let out = render_conversation_list(&conversations, "b");
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("  1. Monday (1 message,"));
        assert!(lines[1].starts_with("* 2. (untitled) (4 messages,"));
        assert_eq!(render_conversation_list(&[], "a"), "No saved conversations yet.");
    }

    #[test]
    fn greeting_uses_the_narrative_for_returning_users() {
        let mut context = RehydratedContext::new_session();
        assert!(render_greeting(&context).starts_with("Welcome."));
        context.status = SessionStatus::Returning;
        context.narrative = "The pressure at work came up when we talked before.".to_string();
        assert_eq!(
            render_greeting(&context),
            "Welcome back. The pressure at work came up when we talked before."
        );
    }
}
