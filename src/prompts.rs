//! Prompt text sent to the chat model.
//!
//! Classification and grounded answer generation each use one system
//! prompt; the user messages are built here so the strategies never format
//! prompt text themselves.

use crate::index::fields;
use crate::models::SearchResult;

/// System prompt for question classification and filter extraction.
pub const CLASSIFICATION_PROMPT: &str = r#"You are a query classification expert for a legal enforcement document search system covering OFAC sanctions enforcement actions, guidance, licences and expert commentary. Classify the user's question into exactly one of these categories.

## QUERY TYPES

### basic_search
Questions that can be turned into structured search filters:
- date ranges ("from 2020 to 2023", "in 2022")
- sanctions programs ("Iran sanctions", "Cuba program")
- document types ("voluntary disclosures", "enforcement actions")
- industries ("financial services", "shipping")
- penalty amounts ("over $1 million")
- respondent characteristics ("foreign entities")
Examples:
- "Find OFAC violations related to Iran sanctions from 2020 to 2023"
- "Show me voluntary disclosures in the financial services industry"
- "Search for cases involving penalties over $1 million in 2022"

### advanced_search
Questions that need semantic understanding of document content: legal interpretation, "what / how / why" questions, synthesis across documents, expert commentary.
Examples:
- "Can Iranian origin banknotes be imported into the U.S.?"
- "How does OFAC determine penalty amounts?"
- "What constitutes a voluntary disclosure under OFAC regulations?"

### nl2sql
Statistical or aggregate questions: counts, totals, averages, rankings, numeric trends.
Examples:
- "How many violations were there in 2023?"
- "What's the average penalty amount for financial institutions?"
- "Show me the top 10 largest penalties by amount"

### clarification_needed
Questions too vague or ambiguous to route.
Examples:
- "Tell me about sanctions"
- "What happened?"

## INSTRUCTIONS
1. Pick exactly one query type.
2. Give a confidence between 0.0 and 1.0 (0.9+ obvious, 0.7-0.8 minor ambiguity, 0.5-0.6 could fit several types, below 0.5 unclear).
3. Explain the choice in one or two sentences.
4. For clarification_needed, write a specific follow-up question.
5. For basic_search, extract filters. Omit every filter the question does not state. Never invent a date range or program.
When torn between basic_search and advanced_search, prefer advanced_search.

## FILTERS (basic_search only)
{
  "date_issued_begin": integer year or null,
  "date_issued_end": integer year or null,
  "programs": [sanctions program names],
  "industries": [industry names],
  "document_types": [document type names],
  "legal_issues": [legal issue names],
  "respondent_nationalities": [country names],
  "regulatory_provisions": [cited regulation sections, e.g. "31 CFR 560.204"],
  "enforcement_characterizations": [characterization labels, e.g. "Penalty", "Finding of Violation"],
  "ofac_penalties": [penalty band labels],
  "aggregate_penalties": [aggregate penalty band labels],
  "min_penalty": number in USD or null,
  "violations_low": integer or null,
  "violations_high": integer or null,
  "published": boolean or null,
  "voluntary_disclosure": boolean or null,
  "egregious_case": boolean or null,
  "keywords": "free-text terms not covered by another filter" or null,
  "exclude_commentaries": false
}

## OUTPUT
Respond with a single JSON object and nothing else:
{
  "query_type": "basic_search | advanced_search | nl2sql | clarification_needed",
  "confidence": 0.85,
  "reasoning": "why this type was chosen",
  "clarification_question": "only for clarification_needed",
  "filters": { }
}"#;

/// System prompt for answers grounded in retrieved passages.
pub const GROUNDED_ANSWER_PROMPT: &str = r#"Review the provided documents and commentary to answer the user's question.

### Guidance ###
1. From the provided documents, identify which are relevant to the question.
2. For each relevant document, explain how it addresses the question. Cite the document by its title in brackets, e.g. [Title]. Never refer to documents by number.
3. If the commentary is relevant, explain how it addresses the question.
4. If the documents and commentary hold nothing relevant, say that you could not find relevant information. Never answer with anything outside the search results. This is a legal research tool and accuracy is paramount. Do not make assumptions or inferences.
5. Include each cited document's ReferenceCount (how often the commentary cites it), e.g. "[Title] (ReferenceCount: 12)". Give more weight to documents with higher ReferenceCount.

### Output Format ###
- Begin by naming the documents you rely on ("According to [Title]...").
- Attribute every statement to the document it came from.
- Summarize relevant expert commentary at the end.
- Use bullet points where they help."#;

/// Instruction appended to the user message when retrieval found nothing.
pub const NO_EVIDENCE_INSTRUCTION: &str = "No supporting evidence was found in the document collection for this question. Say so plainly and do not answer from general knowledge.";

/// User message for classification.
pub fn classification_message(question: &str) -> String {
    format!("Classify this question:\n\n{}", question.trim())
}

/// Delineated text block for one retrieved document.
pub fn passage_block(result: &SearchResult) -> String {
    let section = |heading: &str, field: &str| {
        let body = result.text_field(field).unwrap_or("N/A");
        format!("=== {} ===\n{}\n", heading, body.trim())
    };

    let reference_count = result
        .fields
        .get(fields::REFERENCE_COUNT)
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "0".to_string());

    let mut block = String::new();
    block.push_str(&section("TITLE", fields::TITLE));
    block.push_str(&section("KEY FACTS", fields::KEY_FACTS));
    block.push_str(&section("DOCUMENT TEXT", fields::DOCUMENT_TEXT));
    block.push_str(&section("COMMENTARY", fields::COMMENTARY));
    block.push_str(&format!("=== REFERENCE COUNT ===\n{}\n", reference_count));
    block
}

/// User message for grounded answer generation.
pub fn grounded_answer_message(question: &str, passages: &[SearchResult]) -> String {
    let mut msg = format!(
        "Create a comprehensive answer to the following question using only the search results below.\n\nQuestion: {}\n\n",
        question.trim()
    );

    if passages.is_empty() {
        msg.push_str(NO_EVIDENCE_INSTRUCTION);
        msg.push('\n');
        return msg;
    }

    msg.push_str("Search Results:\n\n");
    for (i, passage) in passages.iter().enumerate() {
        msg.push_str(&format!("DOCUMENT {}:\n{}\n", i + 1, passage_block(passage)));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn passage() -> SearchResult {
        let mut r = SearchResult::new("7", 1.0);
        r.fields.insert("Title".into(), json!("Guidance on Banknotes"));
        r.fields.insert("KeyFacts".into(), json!("Importation requires a licence."));
        r.fields.insert("ReferenceCount".into(), json!(12));
        r
    }

    #[test]
    fn test_prompt_names_every_filter() {
        let populated = crate::models::SearchFilters {
            date_issued_begin: Some(2020),
            date_issued_end: Some(2023),
            programs: vec!["Iran".into()],
            industries: vec!["Banking".into()],
            document_types: vec!["Enforcement Release".into()],
            legal_issues: vec!["Exports".into()],
            respondent_nationalities: vec!["Germany".into()],
            regulatory_provisions: vec!["31 CFR 560.204".into()],
            enforcement_characterizations: vec!["Penalty".into()],
            ofac_penalties: vec!["$1M-$10M".into()],
            aggregate_penalties: vec!["Over $10M".into()],
            min_penalty: Some(1.0),
            violations_low: Some(1),
            violations_high: Some(2),
            published: Some(true),
            voluntary_disclosure: Some(true),
            egregious_case: Some(false),
            keywords: Some("banknotes".into()),
            exclude_commentaries: true,
        };
        let json = serde_json::to_value(&populated).unwrap();
        for key in json.as_object().unwrap().keys() {
            assert!(
                CLASSIFICATION_PROMPT.contains(&format!("\"{}\"", key)),
                "prompt schema is missing {}",
                key
            );
        }
    }

    #[test]
    fn test_passage_block_sections() {
        let block = passage_block(&passage());
        assert!(block.starts_with("=== TITLE ===\nGuidance on Banknotes\n"));
        assert!(block.contains("=== KEY FACTS ===\nImportation requires a licence."));
        assert!(block.contains("=== COMMENTARY ===\nN/A"));
        assert!(block.contains("=== REFERENCE COUNT ===\n12"));
    }

    #[test]
    fn test_grounded_message_numbers_documents() {
        let msg = grounded_answer_message("Can banknotes be imported?", &[passage(), passage()]);
        assert!(msg.contains("DOCUMENT 1:"));
        assert!(msg.contains("DOCUMENT 2:"));
        assert!(!msg.contains(NO_EVIDENCE_INSTRUCTION));
    }

    #[test]
    fn test_grounded_message_without_passages() {
        let msg = grounded_answer_message("Can banknotes be imported?", &[]);
        assert!(msg.contains(NO_EVIDENCE_INSTRUCTION));
        assert!(!msg.contains("DOCUMENT 1"));
    }

    #[test]
    fn test_classification_prompt_names_every_label() {
        for label in ["basic_search", "advanced_search", "nl2sql", "clarification_needed"] {
            assert!(CLASSIFICATION_PROMPT.contains(label));
        }
    }
}
