use leaf_core::chat::{sanitize_history, ChatMessage, Role};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub const SYSTEM_PROMPT: &str = "You are an agricultural assistant focused on leaf diseases and closely related crop-health topics. Maintain a formal, concise tone.\n\
Near-related means: symptoms, diagnosis, integrated pest management, pests/insects, environmental conditions (humidity, watering, soil, nutrients), safe handling, prevention, treatment, and model-based classification context.\n\
Conversation rules:\n\
- Use the conversation context to understand references (e.g., 'that corn', 'alternative treatment').\n\
- On follow-ups, DO NOT repeat the full guide/sections. Answer only what is asked.\n\
- Honor explicit format requests: 'paragraph' => one short paragraph; 'one sentence' => a single sentence; 'outline/bullets' => only bullet points.\n\
- When a disease name is provided and a FULL GUIDE is requested, respond ONLY with STRICT JSON: causes[], prevention[], treatment[], risk_factors[], short_description. No extra text. 3-5 items per list.\n\
- If ambiguous and no disease is provided, ask for the exact disease name in ONE short, formal sentence.\n\
- Be accurate. If unsure, state uncertainty and request clarification. Do not invent facts.\n\
- Non-JSON answers must be <= 80 words unless the user explicitly requests an outline.\n";

/// Labels the local classifier can emit, lowercase. Used to adopt a disease
/// mentioned in free text when the request did not carry one.
pub const KNOWN_DISEASES: [&str; 11] = [
    // Corn
    "common rust",
    "gray leaf spot",
    "leaf blight",
    "healthy",
    // Potato
    "early blight",
    "late blight",
    // Rice
    "brown spot",
    "leaf blast",
    // Wheat
    "brown rust",
    "yellow rust",
    // Other
    "invalid",
];

pub const GREETING_REPLY: &str = "Hello. How may I assist you with leaf disease detection, causes, prevention, treatment, or risk factors?";
pub const THANKS_REPLY: &str =
    "You're welcome. If you need more help with leaf diseases, please let me know.";

const GREETINGS: [&str; 6] = ["hi", "hello", "hey", "good morning", "good afternoon", "good evening"];
const THANKS: [&str; 3] = ["thanks", "thank you", "thankyou"];

const OUTLINE_KEYWORDS: [&str; 6] =
    ["outline", "bullets", "bullet points", "bullet list", "list of", "make a list"];

/// Canonical section name -> trigger synonyms, matched whole-word.
const SECTION_MAP: [(&str, &[&str]); 4] = [
    ("prevention", &["prevention", "preventive", "avoidance"]),
    ("treatment", &["treatment", "control", "management"]),
    ("causes", &["cause", "causes", "etiology"]),
    ("risk_factors", &["risk", "risk factor", "risk factors"]),
];

pub struct ComposeInput<'a> {
    pub message: &'a str,
    pub disease: Option<String>,
    pub confidence: Option<f64>,
    pub history: &'a Value,
    pub force_json: bool,
}

/// A prompt ready for the upstream call.
#[derive(Clone, Debug)]
pub struct ComposedPrompt {
    pub messages: Vec<ChatMessage>,
    /// Ask the upstream for a strict-JSON object response.
    pub json_mode: bool,
    pub disease: Option<String>,
}

/// Outcome of composition: either a canned reply that must bypass the
/// upstream entirely, or an assembled message list.
#[derive(Clone, Debug)]
pub enum Composed {
    Canned(&'static str),
    Upstream(ComposedPrompt),
}

/// Lowercases alphanumerics, keeps whitespace, and flattens every other
/// character to a space. Used for greeting/thanks checks and disease
/// matching.
pub fn normalize(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for ch in message.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() {
            out.push(ch);
        } else {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

fn whole_word(text: &str, needle: &str) -> bool {
    static CACHE: OnceLock<std::sync::Mutex<std::collections::HashMap<String, Regex>>> =
        OnceLock::new();
    let cache = CACHE.get_or_init(Default::default);
    let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
    let re = cache
        .entry(needle.to_string())
        .or_insert_with(|| {
            Regex::new(&format!(r"\b{}\b", regex::escape(needle))).expect("static word pattern")
        });
    re.is_match(text)
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// First known disease mentioned whole-word in the normalized message,
/// title-cased for display.
pub fn detect_disease(normalized: &str) -> Option<String> {
    KNOWN_DISEASES
        .iter()
        .find(|name| whole_word(normalized, name))
        .map(|name| title_case(name))
}

/// Outline mode plus the canonical sections it should focus on. Defaults to
/// prevention when the message asks for bullets without naming a section.
pub fn detect_outline(message: &str) -> (bool, Vec<&'static str>) {
    let lower = message.to_lowercase();
    let outline = OUTLINE_KEYWORDS.iter().any(|k| lower.contains(k));
    if !outline {
        return (false, Vec::new());
    }
    let mut sections: Vec<&'static str> = Vec::new();
    for (section, synonyms) in SECTION_MAP {
        if synonyms.iter().any(|s| whole_word(&lower, s)) {
            sections.push(section);
        }
    }
    if sections.is_empty() {
        sections.push("prevention");
    }
    (true, sections)
}

pub fn compose(input: ComposeInput<'_>) -> Composed {
    let normalized = normalize(input.message);

    if GREETINGS.contains(&normalized.as_str())
        || normalized.starts_with("hello")
        || normalized.starts_with("hi ")
        || normalized.starts_with("hey")
    {
        return Composed::Canned(GREETING_REPLY);
    }
    if THANKS.iter().any(|t| normalized.contains(t)) {
        return Composed::Canned(THANKS_REPLY);
    }

    let disease = input.disease.clone().or_else(|| detect_disease(&normalized));
    let (outline, sections) = detect_outline(input.message);

    let context_line = match &disease {
        Some(name) => {
            let confidence = input
                .confidence
                .map(|c| c.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            format!("Disease: {name}. Confidence: {confidence}.")
        }
        None => "No disease provided. If answering a general plant-health question, reply in one \
                 short, formal paragraph (<= 80 words). If a disease name is present, return the \
                 strict JSON as instructed."
            .to_string(),
    };

    let fmt_instruction = if outline {
        format!(
            "\nFORMAT: Return ONLY bullet points (lines starting with '- '), no numbering, no \
             intro/outro. Provide 3-7 concise phrase bullets. Focus on: {}. If a disease name is \
             present, keep bullets specific to it; otherwise, give general guidance for leaf \
             diseases.",
            sections.join(", ")
        )
    } else {
        String::new()
    };

    let question = if input.message.is_empty() {
        "Provide a concise guide."
    } else {
        input.message
    };

    let mut messages = vec![ChatMessage::new(Role::System, SYSTEM_PROMPT)];
    messages.extend(sanitize_history(input.history));
    messages.push(ChatMessage::new(
        Role::User,
        format!("{context_line}{fmt_instruction}\n\nUser question: {question}"),
    ));

    let json_mode = input.force_json && disease.is_some() && !outline;
    Composed::Upstream(ComposedPrompt { messages, json_mode, disease })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn compose_msg(message: &str) -> Composed {
        compose(ComposeInput {
            message,
            disease: None,
            confidence: None,
            history: &Value::Null,
            force_json: false,
        })
    }

    fn expect_prompt(out: Composed) -> ComposedPrompt {
        match out {
            Composed::Upstream(p) => p,
            Composed::Canned(c) => panic!("expected upstream prompt, got canned reply {c:?}"),
        }
    }

    #[test]
    fn normalize_lowercases_and_flattens_punctuation() {
        assert_eq!(normalize("  Hi!!There?  "), "hi there");
        assert_eq!(normalize("Hello."), "hello");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn greetings_are_canned_even_with_punctuation() {
        for msg in ["hi", "Hello!", "HEY", "good morning", "hello there friend"] {
            match compose_msg(msg) {
                Composed::Canned(reply) => assert_eq!(reply, GREETING_REPLY),
                Composed::Upstream(_) => panic!("{msg:?} should be canned"),
            }
        }
    }

    #[test]
    fn thanks_are_canned() {
        match compose_msg("ok thanks a lot") {
            Composed::Canned(reply) => assert_eq!(reply, THANKS_REPLY),
            Composed::Upstream(_) => panic!("should be canned"),
        }
    }

    #[test]
    fn plain_questions_go_upstream() {
        let prompt = expect_prompt(compose_msg("how do I water tomatoes"));
        assert_eq!(prompt.messages.first().unwrap().role, Role::System);
        assert!(prompt
            .messages
            .last()
            .unwrap()
            .content
            .contains("User question: how do I water tomatoes"));
        assert!(!prompt.json_mode);
    }

    #[test]
    fn disease_is_adopted_from_message_and_title_cased() {
        let prompt = expect_prompt(compose_msg("tell me about late blight on my potatoes"));
        assert_eq!(prompt.disease.as_deref(), Some("Late Blight"));
        assert!(prompt
            .messages
            .last()
            .unwrap()
            .content
            .starts_with("Disease: Late Blight. Confidence: N/A."));
    }

    #[test]
    fn explicit_disease_wins_over_detection() {
        let prompt = expect_prompt(compose(ComposeInput {
            message: "what about early blight",
            disease: Some("Late Blight".to_string()),
            confidence: Some(0.97),
            history: &Value::Null,
            force_json: false,
        }));
        assert_eq!(prompt.disease.as_deref(), Some("Late Blight"));
        assert!(prompt
            .messages
            .last()
            .unwrap()
            .content
            .starts_with("Disease: Late Blight. Confidence: 0.97."));
    }

    #[test]
    fn partial_words_do_not_match_diseases() {
        let prompt = expect_prompt(compose_msg("my plants look unhealthy today"));
        assert_eq!(prompt.disease, None);
    }

    #[test]
    fn make_a_list_defaults_to_prevention() {
        let (outline, sections) = detect_outline("please make a list for me");
        assert!(outline);
        assert_eq!(sections, vec!["prevention"]);
    }

    #[test]
    fn outline_scopes_to_named_sections() {
        let (outline, sections) = detect_outline("give me an outline of treatment options");
        assert!(outline);
        assert_eq!(sections, vec!["treatment"]);

        let (outline, sections) = detect_outline("bullet points on causes and risk factors");
        assert!(outline);
        assert_eq!(sections, vec!["causes", "risk_factors"]);
    }

    #[test]
    fn no_outline_without_keywords() {
        let (outline, sections) = detect_outline("how do I treat late blight");
        assert!(!outline);
        assert!(sections.is_empty());
    }

    #[test]
    fn outline_prompt_carries_format_directive() {
        let prompt = expect_prompt(compose_msg("make a list about late blight treatment"));
        let content = &prompt.messages.last().unwrap().content;
        assert!(content.contains("FORMAT: Return ONLY bullet points"));
        assert!(content.contains("Focus on: treatment."));
    }

    #[test]
    fn json_mode_requires_disease_and_no_outline() {
        let with_disease = expect_prompt(compose(ComposeInput {
            message: "late blight",
            disease: None,
            confidence: None,
            history: &Value::Null,
            force_json: true,
        }));
        assert!(with_disease.json_mode);

        let outline = expect_prompt(compose(ComposeInput {
            message: "make a list about late blight",
            disease: None,
            confidence: None,
            history: &Value::Null,
            force_json: true,
        }));
        assert!(!outline.json_mode);

        let no_disease = expect_prompt(compose(ComposeInput {
            message: "my leaves have spots",
            disease: None,
            confidence: None,
            history: &Value::Null,
            force_json: true,
        }));
        assert!(!no_disease.json_mode);
    }

    #[test]
    fn history_lands_between_system_and_user_turn() {
        let history = json!([
            {"role": "user", "content": "what is late blight"},
            {"role": "assistant", "content": "a potato disease"},
        ]);
        let prompt = expect_prompt(compose(ComposeInput {
            message: "and how do I prevent it",
            disease: None,
            confidence: None,
            history: &history,
            force_json: false,
        }));
        assert_eq!(prompt.messages.len(), 4);
        assert_eq!(prompt.messages[1].content, "what is late blight");
        assert_eq!(prompt.messages[2].role, Role::Assistant);
    }

    #[test]
    fn empty_message_falls_back_to_default_question() {
        let prompt = expect_prompt(compose(ComposeInput {
            message: "",
            disease: Some("Late Blight".to_string()),
            confidence: None,
            history: &Value::Null,
            force_json: false,
        }));
        assert!(prompt
            .messages
            .last()
            .unwrap()
            .content
            .ends_with("User question: Provide a concise guide."));
    }
}
