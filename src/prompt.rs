use crate::message::Exchange;
use crate::weather::WeatherReport;

/// Builds the prompts sent to the language model.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    persona: String,
}

impl PromptBuilder {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
        }
    }

    /// Numbered history lines, a newline, then the persona description with
    /// the new utterance appended after a colon.
    pub fn persona_prompt(&self, history: &[Exchange], utterance: &str) -> String {
        let history = history
            .iter()
            .enumerate()
            .map(|(i, exchange)| format!("Conversation {}: {exchange}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{history}\n{}: {utterance}", self.persona)
    }

    pub fn weather_prompt(&self, report: &WeatherReport) -> String {
        format!(
            "The weather is {}. Write a funny phrase about this.",
            report.description
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_prompt_numbers_history_from_one() {
        let builder = PromptBuilder::new("Be Ayush");
        let history = vec![Exchange::new("hi", "hey"), Exchange::new("food?", "biryani")];
        let prompt = builder.persona_prompt(&history, "movie tonight?");
        assert_eq!(
            prompt,
            "Conversation 1: User: hi | Bot: hey\nConversation 2: User: food? | Bot: biryani\nBe Ayush: movie tonight?"
        );
    }

    #[test]
    fn persona_prompt_without_history_starts_with_newline() {
        let prompt = PromptBuilder::new("Be Ayush").persona_prompt(&[], "yo");
        assert_eq!(prompt, "\nBe Ayush: yo");
    }

    #[test]
    fn weather_prompt_embeds_description() {
        let prompt = PromptBuilder::new("p").weather_prompt(&WeatherReport::new("Oslo", "snow"));
        assert_eq!(prompt, "The weather is snow. Write a funny phrase about this.");
    }
}
