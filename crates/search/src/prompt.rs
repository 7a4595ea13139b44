//! Chat prompt assembly

/// Placed between retrieved chunks in the context block
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n";

/// Join `chunks` (nearest first) and wrap them with the instruction and question
pub fn build_prompt(system_instruction: &str, query: &str, chunks: &[String]) -> String {
    let context = chunks.join(CONTEXT_SEPARATOR);
    format!(
        "System: {}\n\nUser question:\n{}\n\nContext from retrieved text:\n{}",
        system_instruction, query, context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt(
            "Answer from context only.",
            "What moved revenue?",
            &["Pricing changed.".to_string(), "Volume grew.".to_string()],
        );
        assert_eq!(
            prompt,
            "System: Answer from context only.\n\nUser question:\nWhat moved revenue?\n\n\
             Context from retrieved text:\nPricing changed.\n\n---\nVolume grew."
        );
    }

    #[test]
    fn test_no_context() {
        let prompt = build_prompt("sys", "q", &[]);
        assert!(prompt.ends_with("Context from retrieved text:\n"));
    }
}
