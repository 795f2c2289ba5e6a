//! Simulated local-inference engine.
//!
//! Stands in for a real model runtime: loading is a timed progress ramp and
//! completions are assembled from topic-matched templates, then streamed as
//! word-level deltas so the consumer exercises the same code paths a real
//! streaming backend would.

use std::sync::LazyLock;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::{ChatMessage, CompletionStream, EngineError, EngineResult, StreamEvent};
use crate::core::message::Role;
use crate::models::ModelInfo;

/// Topic detection patterns, checked in declaration order.
static TOPIC_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("greeting", r"\b(hi|hello|hey|greetings)\b"),
        ("weather", r"\b(weather|temperature|forecast|rain|sunny|cloudy)\b"),
        ("help", r"\b(help|assist|support)\b"),
        ("movies", r"\b(movie|film|cinema|watch|actor|actress|director)\b"),
        ("music", r"\b(music|song|artist|band|album|concert)\b"),
        ("food", r"\b(food|eat|cooking|recipe|restaurant|dish|meal)\b"),
        (
            "programming",
            r"\b(code|programming|javascript|python|developer|software)\b",
        ),
        ("science", r"\b(science|physics|chemistry|biology|scientific)\b"),
        (
            "sports",
            r"\b(sport|football|soccer|basketball|baseball|tennis|game)\b",
        ),
        (
            "technology",
            r"\b(technology|tech|computer|phone|device|gadget)\b",
        ),
        ("health", r"\b(health|medical|doctor|exercise|fitness)\b"),
        (
            "travel",
            r"\b(travel|trip|vacation|flight|hotel|destination|country|city)\b",
        ),
        ("book", r"\b(book|reading|author|novel|story)\b"),
    ]
    .into_iter()
    .map(|(topic, pattern)| {
        let re = Regex::new(&format!("(?i){pattern}")).expect("static topic pattern");
        (topic, re)
    })
    .collect()
});

/// Per-topic response templates for a model persona.
type TopicTemplates = &'static [(&'static str, &'static [&'static str])];

const LLAMA_TEMPLATES: TopicTemplates = &[
    ("default", &[
        "As Llama 3, I can provide information on a wide range of topics while running locally on your device. %CONTENT%",
        "I'm processing your query about %TOPIC% locally using Meta's Llama 3 model. %CONTENT%",
        "Thanks for asking about %TOPIC%. As a locally-running Llama 3 model, I can help with that. %CONTENT%",
    ]),
    ("greeting", &[
        "Hello there! I'm Llama 3, a language model running locally on your device. How can I assist you today?",
        "Hi! I'm Meta's Llama 3 model, operating directly on your machine for privacy. What can I help you with?",
        "Greetings! I'm Llama 3 by Meta, running locally for private conversations. How may I help you?",
    ]),
    ("weather", &[
        "While I don't have access to real-time weather data, I can explain how weather forecasting works or discuss climate patterns in general.",
        "I don't have access to current weather information since I run locally and don't have internet access. To check the weather, you might want to use a weather app or website.",
        "Since I'm running locally on your device without internet access, I can't provide current weather information. For that, you would need a service with real-time data access.",
    ]),
];

const MISTRAL_TEMPLATES: TopicTemplates = &[
    ("default", &[
        "I'm processing your question about %TOPIC% using Mistral's 7B parameter model, running locally for privacy. %CONTENT%",
        "As Mistral 7B running on your device, I can provide insights about %TOPIC%. %CONTENT%",
        "Your question about %TOPIC% is interesting. As a locally-running Mistral 7B model, here's what I can tell you: %CONTENT%",
    ]),
    ("greeting", &[
        "Hello! I'm Mistral 7B, a language model running locally on your device. How can I help you today?",
        "Hi there! I'm the Mistral 7B model, operating right here on your machine for privacy. What would you like assistance with?",
        "Greetings! I'm Mistral 7B, ready to assist while keeping your data private by running locally. How can I help?",
    ]),
];

const GEMMA_TEMPLATES: TopicTemplates = &[
    ("default", &[
        "As Google's Gemma 2B model running locally, I can provide information about %TOPIC%. %CONTENT%",
        "I'm analyzing your question about %TOPIC% using Google's Gemma 2B model, which runs entirely on your device. %CONTENT%",
        "Your inquiry about %TOPIC% is interesting. As a locally-running Gemma 2B model, here's what I know: %CONTENT%",
    ]),
    ("greeting", &[
        "Hello! I'm Gemma 2B, Google's language model running locally on your device. How can I assist you today?",
        "Hi there! I'm Google's Gemma 2B model, operating directly on your machine for privacy. What can I help you with?",
        "Greetings! I'm Gemma, a lightweight model from Google running locally. How may I assist you today?",
    ]),
];

/// Fallback templates for models without a dedicated persona.
const GENERIC_TEMPLATES: TopicTemplates = &[
    ("default", &[
        "I'm processing your query about %TOPIC% locally for privacy. %CONTENT%",
        "Thanks for asking about %TOPIC%. Here's what I can tell you: %CONTENT%",
        "Your question about %TOPIC% is interesting. As a locally-running model, here's my response: %CONTENT%",
    ]),
    ("greeting", &[
        "Hello! I'm a language model running locally on your device. How can I help you today?",
        "Hi there! I'm a language model operating directly on your machine for privacy. What can I help you with?",
        "Greetings! I'm a language model running locally. How may I assist you today?",
    ]),
];

/// Topic-specific body content substituted for %CONTENT%.
const TOPIC_CONTENTS: TopicTemplates = &[
    ("default", &[
        "I can provide information on a wide range of topics while maintaining your privacy.",
        "I'm designed to be helpful while keeping your data secure by processing everything locally.",
        "Let me know if you need more specific information on this or another topic.",
    ]),
    ("weather", &[
        "Weather forecasting combines atmospheric science, data collection, and predictive modeling to estimate future conditions.",
        "Climate patterns are influenced by factors like ocean currents, atmospheric pressure systems, and seasonal variations.",
        "Local microclimates can significantly differ from regional weather due to factors like elevation, water bodies, and urban development.",
    ]),
    ("help", &[
        "I'm here to assist with information, answer questions, or engage in conversation on various topics.",
        "I can explain concepts, provide summaries, or discuss ideas across many subjects, all while running on your local device.",
        "Feel free to ask about specific topics, and I'll do my best to provide helpful information.",
    ]),
    ("movies", &[
        "Film is a visual art form that tells stories through sequences of moving images, sound, and dialogue.",
        "Cinema has evolved tremendously since its inception, from silent films to today's digital productions with advanced visual effects.",
        "Different film genres like drama, comedy, science fiction, and documentary offer unique storytelling approaches and experiences.",
    ]),
    ("music", &[
        "Music is organized sound that combines elements like rhythm, melody, harmony, and timbre into artistic expressions.",
        "Musical traditions vary greatly across cultures, each with unique instruments, scales, and performance practices.",
        "Technology has transformed music production, distribution, and consumption throughout history, from phonographs to streaming services.",
    ]),
    ("programming", &[
        "Programming languages are formal languages that specify a set of instructions for computers to execute specific tasks.",
        "Software development involves designing, coding, testing, and maintaining applications that solve real-world problems.",
        "Computer science principles like algorithms, data structures, and computational complexity underpin modern programming.",
    ]),
    ("science", &[
        "The scientific method provides a systematic approach to understanding the natural world through observation, hypothesis formation, and experimentation.",
        "Various scientific disciplines examine different aspects of reality, from the smallest subatomic particles to the vastness of the cosmos.",
        "Scientific discoveries have revolutionized our understanding of the universe and led to countless technological innovations.",
    ]),
    ("sports", &[
        "Sports combine physical activity, skill development, and competition, often within structured rule systems.",
        "Athletic events have cultural significance worldwide, bringing people together through shared experiences and traditions.",
        "The science of sports performance examines biomechanics, nutrition, psychology, and training methodologies to optimize athletic achievement.",
    ]),
    ("technology", &[
        "Technological innovation involves developing new tools, systems, and methods to solve problems and extend human capabilities.",
        "Digital technologies have transformed how we communicate, work, learn, and entertain ourselves in the modern world.",
        "Emerging technologies like artificial intelligence, biotechnology, and quantum computing promise to reshape society in profound ways.",
    ]),
    ("health", &[
        "Health involves physical, mental, and social well-being, not merely the absence of disease or infirmity.",
        "Preventive healthcare focuses on lifestyle factors, regular screenings, and early interventions to maintain wellness.",
        "Medical science continues to advance our understanding of human biology and develop new treatments for various conditions.",
    ]),
    ("travel", &[
        "Travel broadens perspectives by exposing people to different cultures, environments, and ways of living.",
        "Tourism encompasses various experiences, from relaxation and adventure to cultural immersion and educational exploration.",
        "Transportation systems have evolved dramatically, making previously remote destinations accessible to more people.",
    ]),
    ("book", &[
        "Literature offers insights into human experiences, emotions, and societies across time and cultures.",
        "Reading engages the imagination, builds vocabulary, and develops critical thinking skills.",
        "Different literary genres provide unique frameworks for storytelling, from poetry and drama to novels and non-fiction.",
    ]),
];

/// Asides inserted after the first sentence for long prompts.
const COMPLEXITY_ADDITIONS: &[&str] = &[
    " I notice your question is quite detailed. ",
    " That's a thoughtful query. ",
    " Your question has multiple interesting aspects. ",
];

/// Prompt length beyond which a complexity aside is inserted.
const COMPLEX_PROMPT_LEN: usize = 50;

fn lookup<'a>(table: TopicTemplates, topic: &str) -> Option<&'a [&'static str]> {
    table
        .iter()
        .find(|(name, _)| *name == topic)
        .map(|(_, entries)| *entries)
}

/// Detects the prompt's topic, defaulting to "default".
fn detect_topic(prompt: &str) -> &'static str {
    let normalized = prompt.trim().to_lowercase();
    TOPIC_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(&normalized))
        .map_or("default", |(topic, _)| topic)
}

fn persona_templates(model_id: &str) -> TopicTemplates {
    match model_id {
        "meta-llama3-8b" => LLAMA_TEMPLATES,
        "mistral-7b" => MISTRAL_TEMPLATES,
        "gemma-2b" => GEMMA_TEMPLATES,
        _ => GENERIC_TEMPLATES,
    }
}

fn pick<'a, R: Rng>(rng: &mut R, entries: &'a [&'static str]) -> &'a str {
    entries.choose(rng).copied().unwrap_or("")
}

/// Assembles a full response for the given prompt and model persona.
fn assemble_response(model_id: &str, prompt: &str) -> String {
    let mut rng = rand::thread_rng();
    let topic = detect_topic(prompt);

    let persona = persona_templates(model_id);
    let templates = lookup(persona, topic)
        .or_else(|| lookup(persona, "default"))
        .unwrap_or(&[]);
    let template = pick(&mut rng, templates);

    let contents = lookup(TOPIC_CONTENTS, topic)
        .or_else(|| lookup(TOPIC_CONTENTS, "default"))
        .unwrap_or(&[]);
    let content = pick(&mut rng, contents);

    let topic_label = if topic == "default" { "this topic" } else { topic };
    let mut response = template
        .replace("%TOPIC%", topic_label)
        .replace("%CONTENT%", content);

    if prompt.len() > COMPLEX_PROMPT_LEN {
        let addition = pick(&mut rng, COMPLEXITY_ADDITIONS);
        if let Some(pos) = response.find(". ") {
            response.insert_str(pos + 2, addition);
        }
    }

    response
}

/// Splits a response into word-level delta chunks.
///
/// Chunks concatenate back to the original text exactly.
fn chunk_text(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

/// The simulated engine.
///
/// Holds at most one loaded model; loading a different model replaces it.
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    loaded: Option<String>,
    load_tick: Duration,
    delta_delay: Duration,
}

impl SimulatedEngine {
    /// Creates an engine with the given simulation timings.
    pub fn new(load_tick: Duration, delta_delay: Duration) -> Self {
        Self {
            loaded: None,
            load_tick,
            delta_delay,
        }
    }

    /// Id of the currently loaded model, if any.
    pub fn loaded_model(&self) -> Option<&str> {
        self.loaded.as_deref()
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(300), Duration::from_millis(24))
    }
}

impl super::InferenceEngine for SimulatedEngine {
    fn is_ready(&self) -> bool {
        self.loaded.is_some()
    }

    async fn load(
        &mut self,
        model: &ModelInfo,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> EngineResult<()> {
        if self.loaded.as_deref() == Some(model.id) {
            on_progress(1.0);
            return Ok(());
        }

        let mut progress = 0.0_f64;
        on_progress(progress);
        while progress < 1.0 {
            tokio::time::sleep(self.load_tick).await;
            // Fast at first, slower towards the end.
            progress += 0.1 * (1.0 - progress * 0.5);
            progress = progress.min(1.0);
            on_progress(progress);
        }

        self.loaded = Some(model.id.to_string());
        Ok(())
    }

    async fn complete(
        &self,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> EngineResult<CompletionStream> {
        let Some(model_id) = self.loaded.as_deref() else {
            return Err(EngineError::not_loaded());
        };

        let prompt = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let response = assemble_response(model_id, prompt);
        let chunks = chunk_text(&response).into_iter();
        let delay = self.delta_delay;

        struct DeltaState {
            chunks: std::vec::IntoIter<String>,
            cancel: CancellationToken,
            delay: Duration,
            finished: bool,
        }

        let state = DeltaState {
            chunks,
            cancel,
            delay,
            finished: false,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            if state.cancel.is_cancelled() {
                return None;
            }
            if let Some(text) = state.chunks.next() {
                if !state.delay.is_zero() {
                    tokio::select! {
                        () = state.cancel.cancelled() => return None,
                        () = tokio::time::sleep(state.delay) => {}
                    }
                }
                return Some((Ok(StreamEvent::Delta { text }), state));
            }
            if state.finished {
                None
            } else {
                state.finished = true;
                Some((Ok(StreamEvent::Done), state))
            }
        });

        Ok(stream.boxed())
    }
}
