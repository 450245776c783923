//! Prompt templates for every LLM-backed step
//!
//! Each builder returns `(system, user)` text. Steps that expect structured output
//! spell out the JSON shape they parse.

use chrono::Utc;

use super::models::{AnalysisOutput, ResearchOutput};

pub struct ResearchPrompts;

impl ResearchPrompts {
    fn current_date() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    // ---------------------------------------------------------------------
    // Master phases
    // ---------------------------------------------------------------------

    pub fn clarify(query: &str) -> (String, String) {
        (
            format!(
                "You screen research requests before work starts. Today's date is {}.\n\
                 Decide whether the request is specific enough to research.\n\
                 Respond with JSON only: {{\"need_clarification\": bool, \"question\": string}}",
                Self::current_date()
            ),
            format!("Research request:\n{}", query),
        )
    }

    pub fn brief(query: &str) -> (String, String) {
        (
            "You turn research requests into a concise research brief: the core question, \
             the sub-questions worth answering, and what a good answer must cover."
                .to_string(),
            format!("Write a research brief for:\n{}", query),
        )
    }

    pub fn initial_draft(brief: &str) -> (String, String) {
        (
            "You write a short initial draft report from a research brief. Mark anything \
             that still needs evidence."
                .to_string(),
            format!("Research brief:\n{}", brief),
        )
    }

    // ---------------------------------------------------------------------
    // Researcher loop
    // ---------------------------------------------------------------------

    pub fn researcher_decision(topic: &str, notes: &[String], iteration: usize) -> (String, String) {
        let recent: Vec<&str> = notes.iter().rev().take(3).map(|n| n.as_str()).collect();
        (
            "You direct a research loop. Reply with the next action in one line, \
             e.g. \"search for <terms>\". Reply \"enough\" when the notes cover the topic."
                .to_string(),
            format!(
                "Topic: {}\nIteration: {}\nNotes so far: {}\nMost recent notes:\n{}",
                topic,
                iteration,
                notes.len(),
                recent.join("\n---\n")
            ),
        )
    }

    pub fn summarize_page(title: &str, content: &str, max_chars: usize) -> (String, String) {
        (
            format!(
                "Summarize web pages for a researcher in at most {} characters. Keep facts, \
                 numbers and names.",
                max_chars
            ),
            format!("Title: {}\n\n{}", title, content),
        )
    }

    pub fn extract_facts(topic: &str, content: &str) -> (String, String) {
        (
            "Extract verifiable facts relevant to the topic.\n\
             Respond with JSON only: {\"facts\": [{\"statement\": string, \"confidence\": number 0-1, \
             \"source\": string, \"category\": string}]}"
                .to_string(),
            format!("Topic: {}\n\nContent:\n{}", topic, content),
        )
    }

    // ---------------------------------------------------------------------
    // Supervisor loop
    // ---------------------------------------------------------------------

    pub fn supervisor_brain(brief: &str, draft: &str, fact_count: usize, iteration: usize) -> (String, String) {
        (
            "You supervise an iterative research process. Decide what to research next.\n\
             Start each directive line with \"research:\" or \"investigate:\"."
                .to_string(),
            format!(
                "Brief:\n{}\n\nIteration: {}\nFacts gathered: {}\n\nCurrent draft:\n{}",
                brief, iteration, fact_count, draft
            ),
        )
    }

    pub fn quality_evaluation(brief: &str, draft: &str, fact_count: usize) -> (String, String) {
        (
            "You grade research drafts on a 0-10 scale for comprehensiveness, accuracy, \
             depth and source quality.\n\
             Respond with JSON only: {\"overall_score\": number, \"dimensions\": [{\"name\": string, \
             \"score\": number, \"justification\": string}], \"summary\": string}"
                .to_string(),
            format!(
                "Brief:\n{}\n\nFacts backing the draft: {}\n\nDraft:\n{}",
                brief, fact_count, draft
            ),
        )
    }

    pub fn red_team(draft: &str) -> (String, String) {
        (
            "You are an adversarial reviewer. Point out unsupported claims, missing \
             perspectives and gaps. Reply PASS if there is nothing material."
                .to_string(),
            format!("Draft under review:\n{}", draft),
        )
    }

    pub fn prune_context(notes: &str, max_facts: usize) -> (String, String) {
        (
            format!(
                "Condense research notes into at most {} key facts, one per line, formatted as:\n\
                 [FACT] claim | source | confidence",
                max_facts
            ),
            notes.to_string(),
        )
    }

    // ---------------------------------------------------------------------
    // Agents
    // ---------------------------------------------------------------------

    pub fn plan_topics(topic: &str, brief: &str) -> (String, String) {
        (
            "Break a research topic into 2-4 focused sub-topics.\n\
             Respond with a JSON array of strings only."
                .to_string(),
            format!("Topic: {}\nBrief: {}", topic, brief),
        )
    }

    pub fn themes(topic: &str, facts: &[String]) -> (String, String) {
        (
            "Identify the recurring themes across these facts.\n\
             Respond with a JSON array of short theme names only."
                .to_string(),
            format!("Topic: {}\nFacts:\n{}", topic, facts.join("\n")),
        )
    }

    pub fn contradictions(facts: &[String]) -> (String, String) {
        (
            "Find pairs of facts that contradict each other.\n\
             Respond with a JSON array only: [{\"fact_1\": string, \"fact_2\": string, \
             \"severity\": number 0-1, \"explanation\": string}]"
                .to_string(),
            format!("Facts:\n{}", facts.join("\n")),
        )
    }

    pub fn importance(topic: &str, facts: &[String]) -> (String, String) {
        (
            "Score how important each fact is to the topic, from 0 to 1.\n\
             Respond with a JSON array of numbers only, in the same order as the facts."
                .to_string(),
            format!("Topic: {}\nFacts:\n{}", topic, numbered(facts)),
        )
    }

    pub fn narrative(topic: &str, brief: &str, insights: &[String], themes: &[String]) -> (String, String) {
        (
            "Write a synthesis narrative of two or three paragraphs that connects the key \
             insights and themes."
                .to_string(),
            format!(
                "Topic: {}\nBrief: {}\nThemes: {}\nKey insights:\n{}",
                topic,
                brief,
                themes.join(", "),
                insights.join("\n")
            ),
        )
    }

    pub fn report(topic: &str, author: &str, research: &ResearchOutput, analysis: &AnalysisOutput) -> (String, String) {
        let insights: Vec<String> = analysis
            .key_insights
            .iter()
            .map(|i| format!("- {}", i.statement))
            .collect();
        (
            format!(
                "You write the final research report as {}.\n\
                 Respond with JSON only: {{\"title\": string, \"executive_summary\": string, \
                 \"sections\": [{{\"heading\": string, \"content\": string, \"gaps\": [string]}}]}}",
                author
            ),
            format!(
                "Topic: {}\nResearch quality: {:.1}/10 over {} iterations, {} facts\n\n\
                 Synthesis:\n{}\n\nKey insights:\n{}\n\nThemes: {}",
                topic,
                research.average_quality,
                research.iterations_used,
                research.fact_count(),
                analysis.synthesis_narrative,
                insights.join("\n"),
                analysis.themes_identified.join(", ")
            ),
        )
    }
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}
