//! Category specialists and their dispatch
//!
//! A specialist is the category-specific behavior (system prompt and sampling
//! temperature) that any provider can execute. The resolver picks the provider;
//! this module decides what the provider is asked.

pub mod resolver;
pub mod retrieval;
pub mod retry;

pub use resolver::{DispatchChunk, DispatchStream, Dispatched, SpecialistResolver};
pub use retrieval::{Retrieved, Retriever};
pub use retry::RetryPolicy;

use crate::providers::CompletionRequest;
use crate::router::Category;
use std::time::Duration;

/// Category-specific prompt template
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Specialist {
    pub category: Category,
    pub name: &'static str,
    pub system_prompt: &'static str,
    /// `None` uses the provider's configured temperature
    pub temperature: Option<f32>,
}

const CODE_VALIDATION: Specialist = Specialist {
    category: Category::CodeValidation,
    name: "code-validator",
    system_prompt: "You are a meticulous code reviewer. Decide whether the code in the \
user's message is valid: syntactically correct, and free of obvious runtime errors \
for the language it is written in.\n\
Begin your answer with exactly one line of the form\n\
Verdict: VALID\n\
or\n\
Verdict: INVALID\n\
then explain the problems found (or why the code is correct) in a few short bullet points.",
    temperature: Some(0.0),
};

const KNOWLEDGE_QUERY: Specialist = Specialist {
    category: Category::KnowledgeQuery,
    name: "knowledge-assistant",
    system_prompt: "You answer questions from documentation and stored knowledge. \
Prefer the reference material supplied with the question when there is any, \
and say so plainly when it does not contain the answer instead of guessing.",
    temperature: Some(0.2),
};

const CODE_GENERATION: Specialist = Specialist {
    category: Category::CodeGeneration,
    name: "code-writer",
    system_prompt: "You write correct, idiomatic, well-structured code. Return the code in \
a fenced block with the language named, followed by a brief explanation of how to use it.",
    temperature: Some(0.2),
};

const CODE_ANALYSIS: Specialist = Specialist {
    category: Category::CodeAnalysis,
    name: "code-analyst",
    system_prompt: "You explain and review existing code. Describe what it does, point out \
bugs, performance problems and risky constructs, and suggest concrete improvements.",
    temperature: Some(0.3),
};

const COMPLEX_REASONING: Specialist = Specialist {
    category: Category::ComplexReasoning,
    name: "reasoner",
    system_prompt: "You solve multi-step problems. Break the problem into steps, reason \
through each one explicitly, state your assumptions, and finish with a clear conclusion.",
    temperature: Some(0.4),
};

const GENERAL_CHAT: Specialist = Specialist {
    category: Category::GeneralChat,
    name: "general-assistant",
    system_prompt: "You are a friendly, helpful assistant. Answer conversationally and \
concisely.",
    temperature: None,
};

impl Specialist {
    /// The specialist that handles `category`
    pub fn for_category(category: Category) -> &'static Specialist {
        match category {
            Category::CodeValidation => &CODE_VALIDATION,
            Category::KnowledgeQuery => &KNOWLEDGE_QUERY,
            Category::CodeGeneration => &CODE_GENERATION,
            Category::CodeAnalysis => &CODE_ANALYSIS,
            Category::ComplexReasoning => &COMPLEX_REASONING,
            Category::GeneralChat => &GENERAL_CHAT,
        }
    }
}

/// One unit of work for the resolver
#[derive(Debug, Clone)]
pub struct SpecialistTask {
    pub category: Category,
    pub message: String,
    /// Reference material prepended to the prompt (e.g. retrieved snippets)
    pub context: Option<String>,
    /// Other categories whose perspective should also be considered
    pub perspectives: Vec<Category>,
    /// Overrides every provider's configured call timeout
    pub timeout: Option<Duration>,
}

impl SpecialistTask {
    pub fn new(category: Category, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            context: None,
            perspectives: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_perspectives(mut self, perspectives: &[Category]) -> Self {
        self.perspectives = perspectives
            .iter()
            .copied()
            .filter(|c| *c != self.category)
            .collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn specialist(&self) -> &'static Specialist {
        Specialist::for_category(self.category)
    }

    /// Render the provider request for this task
    pub fn to_request(&self) -> CompletionRequest {
        let specialist = self.specialist();

        let mut system = specialist.system_prompt.to_string();
        if !self.perspectives.is_empty() {
            let names: Vec<&str> = self.perspectives.iter().map(|c| c.as_str()).collect();
            system.push_str(&format!(
                "\n\nAlso take these perspectives into account where relevant: {}.",
                names.join(", ")
            ));
        }

        let prompt = match &self.context {
            Some(context) => format!(
                "Reference material:\n{}\n\nRequest:\n{}",
                context, self.message
            ),
            None => self.message.clone(),
        };

        let request = CompletionRequest::new(prompt).with_system(system);
        match specialist.temperature {
            Some(temperature) => request.with_temperature(temperature),
            None => request,
        }
    }
}
