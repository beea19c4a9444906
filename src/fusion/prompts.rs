// ABOUTME: System prompt assembly tailored to intent, keywords, and caller expertise
// ABOUTME: Pure string construction, no I/O
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

use super::{ExpertiseLevel, Intent};

/// Base instruction shared by every fusion-routed turn
const BASE_INSTRUCTION: &str =
    "You are a helpful assistant. Answer the user's query directly and accurately.";

/// Per-intent guidance appended to the base instruction
const fn intent_guidance(intent: Intent) -> &'static str {
    match intent {
        Intent::CodeDevelopment => {
            "Focus on correct, idiomatic code. Show code in fenced blocks with the \
             language tag, and point out edge cases the user should test."
        }
        Intent::CreativeWriting => {
            "Prioritize voice, imagery, and rhythm. Match the register the user asks \
             for and avoid formulaic openings."
        }
        Intent::DataAnalysis => {
            "Be precise with numbers and units. State assumptions about the data \
             explicitly and prefer tables for comparisons."
        }
        Intent::Research => {
            "Distinguish established findings from open questions. Note where a claim \
             would need a citation rather than inventing one."
        }
        Intent::Translation => {
            "Preserve meaning and tone over literal word order. Flag idioms that have \
             no direct equivalent."
        }
        Intent::Summarization => {
            "Lead with the key points. Keep the summary proportional to the source and \
             do not introduce information that is not in it."
        }
        Intent::Math => {
            "Work step by step and verify the final result. State the method before \
             applying it."
        }
        Intent::BusinessStrategy => {
            "Structure the answer around trade-offs and concrete recommendations. \
             Quantify impact where possible."
        }
        Intent::Conversation => "Be warm, concise, and natural.",
    }
}

const fn expertise_tone(expertise: ExpertiseLevel) -> &'static str {
    match expertise {
        ExpertiseLevel::Beginner => {
            "The user is new to this topic: explain concepts from first principles and \
             avoid unexplained jargon."
        }
        ExpertiseLevel::Intermediate => {
            "The user has working familiarity with this topic: skip the basics but \
             define specialized terms."
        }
        ExpertiseLevel::Expert => {
            "The user is an expert: be terse and technical, no hand-holding."
        }
    }
}

/// Assemble the system prompt for a fusion-routed turn
#[must_use]
pub fn build_system_prompt(
    intent: Intent,
    keywords: &[String],
    expertise: ExpertiseLevel,
) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(BASE_INSTRUCTION);
    prompt.push_str("\n\n");
    prompt.push_str(intent_guidance(intent));
    prompt.push_str("\n\n");
    prompt.push_str(expertise_tone(expertise));

    if !keywords.is_empty() {
        prompt.push_str("\n\nKey topics in this query: ");
        prompt.push_str(&keywords.join(", "));
        prompt.push('.');
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_intent_guidance() {
        let prompt = build_system_prompt(Intent::Math, &[], ExpertiseLevel::Intermediate);
        assert!(prompt.contains("step by step"));
        assert!(prompt.starts_with(BASE_INSTRUCTION));
    }

    #[test]
    fn test_keywords_appended_when_present() {
        let keywords = vec!["tokio".to_owned(), "channels".to_owned()];
        let prompt = build_system_prompt(Intent::CodeDevelopment, &keywords, ExpertiseLevel::Expert);
        assert!(prompt.contains("tokio, channels"));
        assert!(prompt.contains("terse and technical"));
    }

    #[test]
    fn test_no_keyword_section_when_empty() {
        let prompt = build_system_prompt(Intent::Conversation, &[], ExpertiseLevel::Beginner);
        assert!(!prompt.contains("Key topics"));
    }
}
