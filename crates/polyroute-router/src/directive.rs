//! In-band routing directives: `<**verb target [, target]**>` markers parsed
//! out of the last user message. The parser is tolerant; unknown verbs are
//! ignored and malformed markers only emit a debug event.

const OPEN: &str = "<**";
const CLOSE: &str = "**>";
const DEFAULT_STOP_REPEATS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `!provider[.key[.model]]` — force routing until cleared.
    Force {
        provider: String,
        key: Option<String>,
        model: Option<String>,
    },
    /// `?provider` — prefer while healthy.
    Prefer { provider: String },
    /// `#provider[.key|.model]…` — disable; replaces the previous disable set.
    Disable { specs: Vec<DisableSpec> },
    /// `clear` — drop all session routing state.
    Clear,
    /// `/stopmessage text` — auto-inject a suffix message.
    StopMessage { text: String, max_repeats: u32 },
    /// `/clearstopmessage`.
    ClearStopMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisableSpec {
    pub provider: String,
    /// Key alias or model id; `None` disables the whole provider.
    pub part: Option<String>,
}

/// Parse all markers out of `text`. Returns the directives and the text with
/// markers removed.
pub fn parse_directives(text: &str) -> (Vec<Directive>, String) {
    let mut directives = Vec::new();
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        cleaned.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            // unterminated marker: keep the raw text
            cleaned.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let body = after_open[..end].trim();
        match parse_one(body) {
            Some(directive) => directives.push(directive),
            None => {
                tracing::debug!(marker = %body, "ignoring unknown routing directive");
            }
        }
        rest = &after_open[end + CLOSE.len()..];
    }
    cleaned.push_str(rest);

    (directives, cleaned.trim().to_string())
}

fn parse_one(body: &str) -> Option<Directive> {
    if body.is_empty() {
        return None;
    }
    if body.eq_ignore_ascii_case("clear") {
        return Some(Directive::Clear);
    }
    if let Some(rest) = body.strip_prefix("/stopmessage") {
        let text = rest.trim();
        if text.is_empty() {
            return None;
        }
        return Some(Directive::StopMessage {
            text: text.to_string(),
            max_repeats: DEFAULT_STOP_REPEATS,
        });
    }
    if body.eq_ignore_ascii_case("/clearstopmessage") {
        return Some(Directive::ClearStopMessage);
    }

    if !body.is_char_boundary(1) {
        return None;
    }
    let (sigil, rest) = body.split_at(1);
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    match sigil {
        "!" => {
            let mut parts = rest.splitn(3, '.');
            let provider = parts.next()?.trim().to_string();
            if provider.is_empty() {
                return None;
            }
            Some(Directive::Force {
                provider,
                key: parts.next().map(|part| part.trim().to_string()),
                model: parts.next().map(|part| part.trim().to_string()),
            })
        }
        "?" => Some(Directive::Prefer {
            provider: rest.to_string(),
        }),
        "#" => {
            let specs: Vec<DisableSpec> = rest
                .split(',')
                .map(str::trim)
                .filter(|spec| !spec.is_empty())
                .map(|spec| match spec.split_once('.') {
                    Some((provider, part)) => DisableSpec {
                        provider: provider.trim().to_string(),
                        part: Some(part.trim().to_string()),
                    },
                    None => DisableSpec {
                        provider: spec.to_string(),
                        part: None,
                    },
                })
                .collect();
            if specs.is_empty() {
                return None;
            }
            Some(Directive::Disable { specs })
        }
        _ => None,
    }
}
