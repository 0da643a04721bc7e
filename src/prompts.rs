//! Prompt definitions for the classify, compose and score pipes.
//!
//! The `*_SYSTEM_PROMPT` constants are installed on the Langbase pipes at
//! startup. The task templates are rendered per turn with [`render`] and sent
//! as the user message. Placeholders are written `{name}`.

use crate::pipeline::state::ConversationalState;

/// System prompt for the turn classification pipe.
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You assist a clinician by running a conversational mental-health questionnaire. You read the conversation and decide how the patient's latest message relates to the question that was last asked.

Always answer with a single JSON object of the form {"response": "<CATEGORY>"} and nothing else. Do not wrap it in code fences."#;

/// System prompt for the reply composition pipe.
pub const COMPOSE_SYSTEM_PROMPT: &str = r#"You are a warm, patient virtual assistant conducting a mental-health check-in. Use simple, everyday language. Never read a questionnaire item out verbatim; weave it into the conversation naturally.

Always answer with a single JSON object of the form {"response": "<your message>"} and nothing else. Do not wrap it in code fences."#;

/// System prompt for the questionnaire scoring pipe.
pub const SCORE_SYSTEM_PROMPT: &str = r#"You score completed mental-health questionnaires from chat transcripts. You are careful, conservative, and cite the patient's own words.

Always answer with a single JSON object of the form {"response": {...}} and nothing else. Do not wrap it in code fences."#;

/// Classification task. Placeholders: phase, question_original, question, message, conversation.
pub const CLASSIFY_PROMPT: &str = r#"You are running the {phase} questionnaire.
On your previous turn you asked about "{question_original}", phrased as: "{question}".
The patient replied: "{message}".

Put the reply into exactly one category:
- NORMAL_y: a clear, answerable reply that leans towards "yes".
- NORMAL_n: a clear, answerable reply that leans towards "no".
- DRIFT: a clear reply about something unrelated to the question.
- AMBIGUOUS: a reply that cannot be understood or scored ("hmm", gibberish).
- CLARIFY: the patient asks what the question means. Requests to explain things unrelated to mental health are DRIFT.

Respond as {"response": "<CATEGORY>"}.

Conversation:
{conversation}"#;

/// Scoring task. Placeholders: phase, questions_json, conversation_json.
pub const SCORE_PROMPT: &str = r#"Below is a chat between a patient and an assistant that ran the {phase} questionnaire.

Score every {phase} question. For each question number give:
- "score": an integer inside that question's score_range,
- "remark": a short justification,
- "snippet": the short part of the patient's message the score is based on,
- "keywords": a list of noteworthy short keywords (may be empty).

Respond as {"response": {"<question number>": {"score": 0, "remark": "", "snippet": "", "keywords": []}, ...}}.
If a question was skipped or never answered, give it the lowest score in its score_range.

Questions:
{questions_json}

Conversation:
{conversation_json}"#;

const COMPOSE_INIT: &str = r#"The patient has just started a new session with: "{message}".
Greet them (take the timestamps in the conversation into account) and start the {phase} questionnaire by asking, in your own words: {question}

Conversation:
{conversation}"#;

const COMPOSE_NORMAL: &str = r#"The patient answered clearly: "{message}".
Continue the {phase} questionnaire by asking, in your own words: {question}
You may add one short, personal tip if the conversation calls for it.

Conversation:
{conversation}"#;

const COMPOSE_DRIFT: &str = r#"The patient drifted away from the topic: "{message}".
Acknowledge it briefly and gently steer back to the {phase} question you were asking: {question}

Conversation:
{conversation}"#;

const COMPOSE_AMBIGUOUS: &str = r#"The patient's reply was unclear: "{message}".
Politely ask them to say a bit more, rephrasing the {phase} question if it helps: {question}

Conversation:
{conversation}"#;

const COMPOSE_CLARIFY: &str = r#"The patient asked for clarification: "{message}".
Explain what you meant in plain words, then ask the {phase} question again, rephrased: {question}

Conversation:
{conversation}"#;

const COMPOSE_SKIPPED: &str = r#"The patient could not give a usable answer after several tries; the last message was "{message}".
Do not press further. Move on and ask the next {phase} question, in your own words: {question}

Conversation:
{conversation}"#;

const COMPOSE_CONCLUDE: &str = r#"All questionnaires are finished and the session is over. The patient's last message was "{message}".
Write a supportive closing message with a few personal, practical suggestions based on what was discussed.

Conversation:
{conversation}"#;

/// Composition task for a state. Placeholders: message, phase, question, conversation.
pub fn compose_prompt(state: ConversationalState) -> &'static str {
    match state {
        ConversationalState::Init => COMPOSE_INIT,
        ConversationalState::Normal => COMPOSE_NORMAL,
        ConversationalState::Drift => COMPOSE_DRIFT,
        ConversationalState::Ambiguous => COMPOSE_AMBIGUOUS,
        ConversationalState::Clarify => COMPOSE_CLARIFY,
        ConversationalState::Skipped => COMPOSE_SKIPPED,
        ConversationalState::Conclude | ConversationalState::Complete => COMPOSE_CONCLUDE,
    }
}

/// Substitute `{key}` placeholders in one pass over the template, so
/// substituted text is never scanned again. Unknown placeholders are left as is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let hit = after.find('}').and_then(|end| {
            let key = &after[..end];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (end, *value))
        });
        match hit {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
