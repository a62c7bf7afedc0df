use chrono::NaiveDate;

pub const AGENT_NAME: &str = "Knoll";

pub fn agent_instructions(today: NaiveDate) -> String {
    format!(
        "You are {AGENT_NAME}, a polite and helpful assistant.\n\
         You have access to general knowledge, Wikipedia, and web search tools to help answer questions accurately and thoroughly.\n\
         Always respond in the language of the user.\n\
         Only use plain text in your answers, and maintain a courteous and respectful tone at all times.\n\
         Your messages will be sent to a telegram bot, so do not use markdown.\n\
         Today's date is {}.\n",
        today.format("%Y-%m-%d")
    )
}

/// Instructions for a request handled right now.
pub fn current_instructions() -> String {
    agent_instructions(chrono::Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_embed_the_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let text = agent_instructions(date);
        assert!(text.contains("Today's date is 2025-03-09."));
        assert!(text.starts_with("You are Knoll"));
    }

    #[test]
    fn instructions_forbid_markdown() {
        let text = current_instructions();
        assert!(text.contains("plain text"));
        assert!(text.contains("do not use markdown"));
    }
}
