//! Round-numbered dialect: each exchange rendered as a `[Round i]` block
//! with `问：`/`答：` lines.

use super::punct;
use super::RoundNumbering;
use crate::history::ConversationHistory;

pub fn build_prompt(
    query: &str,
    history: &ConversationHistory,
    numbering: RoundNumbering,
) -> String {
    let exchanges: Vec<_> = history.exchanges().collect();
    match numbering {
        RoundNumbering::ZeroIndexed => {
            // The very first exchange is the bare query, no round prefix.
            if exchanges.is_empty() {
                return query.to_string();
            }
            let mut prompt = String::new();
            for (i, (old_query, response)) in exchanges.iter().enumerate() {
                prompt.push_str(&format!("[Round {i}]\n问：{old_query}\n答：{response}\n"));
            }
            prompt.push_str(&format!("[Round {}]\n问：{query}\n答：", exchanges.len()));
            prompt
        }
        RoundNumbering::OneIndexed => {
            let mut prompt = String::new();
            for (i, (old_query, response)) in exchanges.iter().enumerate() {
                prompt.push_str(&format!(
                    "[Round {}]\n\n问：{old_query}\n\n答：{response}\n",
                    i + 1
                ));
            }
            prompt.push_str(&format!(
                "[Round {}]\n\n问：{query}\n\n答：",
                exchanges.len() + 1
            ));
            prompt
        }
    }
}

pub fn process_response(raw: &str) -> String {
    punct::normalize_cjk_punctuation(raw.trim())
}

pub fn stream_text(raw: &str) -> String {
    let normalized = punct::normalize_cjk_punctuation(raw.trim_start());
    let stable = punct::stream_stable(&normalized);
    // trailing whitespace is withheld: the final trim may drop it
    stable.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_indexed_prompt_matches_convention() {
        let history = ConversationHistory::from_pairs(&[("hi", "hello")]);
        let prompt = build_prompt("bye", &history, RoundNumbering::ZeroIndexed);
        assert_eq!(prompt, "[Round 0]\n问：hi\n答：hello\n[Round 1]\n问：bye\n答：");
    }

    #[test]
    fn test_zero_indexed_empty_history_is_bare_query() {
        let history = ConversationHistory::new();
        let prompt = build_prompt("你好", &history, RoundNumbering::ZeroIndexed);
        assert_eq!(prompt, "你好");
    }

    #[test]
    fn test_one_indexed_prompt_starts_at_round_one() {
        let history = ConversationHistory::new();
        let prompt = build_prompt("hi", &history, RoundNumbering::OneIndexed);
        assert_eq!(prompt, "[Round 1]\n\n问：hi\n\n答：");
    }

    #[test]
    fn test_one_indexed_numbers_past_exchanges() {
        let history = ConversationHistory::from_pairs(&[("a", "b"), ("c", "d")]);
        let prompt = build_prompt("e", &history, RoundNumbering::OneIndexed);
        assert!(prompt.starts_with("[Round 1]\n\n问：a\n\n答：b\n[Round 2]"));
        assert!(prompt.ends_with("[Round 3]\n\n问：e\n\n答："));
    }

    #[test]
    fn test_process_response_trims_and_normalizes() {
        assert_eq!(process_response("  你好,世界!  "), "你好，世界！");
    }

    #[test]
    fn test_stream_text_is_prefix_of_final() {
        let raw = " 你好,世界";
        let streamed = stream_text(raw);
        let fin = process_response(raw);
        assert!(fin.starts_with(&streamed));
    }
}
