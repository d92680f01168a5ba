//! Chat command dispatcher (§4.7): tokenizer, usage-string parser, a
//! name-keyed command table, and dispatch. No teacher analogue exists (the
//! teacher has no chat) - styled after the teacher's small enum/match
//! dispatch idiom seen in `hand_shake.rs`'s `ClientServerSpecificData`
//! handling, generalized to a runtime-registered table since commands are
//! data here, not a fixed enum.

use std::collections::HashMap;

use crate::connection::ClientId;

/// Splits a chat command line into tokens. Single quotes toggle
/// "inside-string" mode; outside a string, ASCII space separates tokens.
/// Quote characters themselves are stripped; empty trailing tokens are
/// discarded (§4.7 "Tokenization").
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut has_content = false;

    for ch in input.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                has_content = true;
            }
            ' ' if !in_string => {
                if has_content {
                    tokens.push(std::mem::take(&mut current));
                    has_content = false;
                }
            }
            other => {
                current.push(other);
                has_content = true;
            }
        }
    }
    if has_content {
        tokens.push(current);
    }
    tokens
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub required: bool,
    pub rest: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedUsage {
    pub name: String,
    pub params: Vec<Parameter>,
}

/// Parses a usage string like `"kick <name> [reason...]"` into a command
/// name and ordered parameter list (§4.7 "Command parsing at registration").
pub fn parse_usage(usage: &str) -> Result<ParsedUsage, String> {
    let mut tokens = usage.split_whitespace();
    let name = tokens.next().unwrap_or("").to_string();
    if name.is_empty() {
        return Err("command name must not be empty".into());
    }
    if name.contains(' ') {
        return Err("command name must not contain spaces".into());
    }

    let mut params = Vec::new();
    let mut seen_optional = false;
    let mut seen_rest = false;

    for token in tokens {
        if seen_rest {
            return Err("rest parameter must be last".into());
        }
        let (required, inner) = if let Some(inner) = token.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
            (true, inner)
        } else if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            (false, inner)
        } else {
            return Err(format!("unrecognized parameter token: {token}"));
        };

        if required && seen_optional {
            return Err("required parameters cannot follow optional ones".into());
        }
        if !required {
            seen_optional = true;
        }

        let rest = inner.ends_with("...");
        let param_name = inner.strip_suffix("...").unwrap_or(inner).to_string();
        if rest {
            seen_rest = true;
        }
        params.push(Parameter {
            name: param_name,
            required,
            rest,
        });
    }

    Ok(ParsedUsage { name, params })
}

/// Renders a `ParsedUsage` back to its canonical usage string, the inverse
/// of `parse_usage` (§8 "Command-usage round-trip").
pub fn render_usage(usage: &ParsedUsage) -> String {
    let mut out = usage.name.clone();
    for param in &usage.params {
        let rest = if param.rest { "..." } else { "" };
        if param.required {
            out.push_str(&format!(" <{}{}>", param.name, rest));
        } else {
            out.push_str(&format!(" [{}{}]", param.name, rest));
        }
    }
    out
}

/// A call-scoped error that should be relayed back to the caller as chat,
/// as opposed to any other handler error, which is logged and swallowed
/// (§4.7 "Dispatch").
#[derive(Debug)]
pub struct CallError(pub String);

pub struct CommandContext<'a> {
    pub room_code: i32,
    pub player: ClientId,
    pub original_message: &'a str,
    pub replies: Vec<String>,
}

impl<'a> CommandContext<'a> {
    /// `ctx.reply(text)`: queues a chat message back to the caller (§4.7
    /// "Reply channel"). The caller turns this into an `Rpc::SendChat` with
    /// `ChatSide::Left`, so the client renders it distinctly from normal chat.
    pub fn reply(&mut self, text: impl Into<String>) {
        self.replies.push(text.into());
    }
}

pub type HandlerResult = Result<(), CallError>;
pub type Handler = Box<dyn Fn(&mut CommandContext, &HashMap<String, String>) -> HandlerResult + Send + Sync>;

pub struct Command {
    pub usage: ParsedUsage,
    pub description: String,
    pub handler: Handler,
}

#[derive(Default)]
pub struct CommandTable {
    commands: HashMap<String, Command>,
    /// Preserves registration order for `help` with no argument.
    order: Vec<String>,
}

impl CommandTable {
    pub fn new() -> Self {
        let mut table = CommandTable::default();
        table.register_help();
        table
    }

    pub fn register(&mut self, usage: &str, description: &str, handler: Handler) -> Result<(), String> {
        let parsed = parse_usage(usage)?;
        let name = parsed.name.clone();
        self.commands.insert(
            name.clone(),
            Command {
                usage: parsed,
                description: description.to_string(),
                handler,
            },
        );
        self.order.push(name);
        Ok(())
    }

    fn register_help(&mut self) {
        self.register(
            "help [command]",
            "Lists registered commands, or details a single one.",
            Box::new(|_ctx, _params| Ok(())),
        )
        .expect("built-in help usage is well-formed");
    }

    /// Binds tokens to a command's parameters in order. Fails with a
    /// formatted usage-and-description message when a required parameter
    /// has no token (§4.7 "Dispatch").
    fn bind(&self, command: &Command, tokens: &[String]) -> Result<HashMap<String, String>, String> {
        let mut bound = HashMap::new();
        let mut iter = tokens.iter();
        for param in &command.usage.params {
            if param.rest {
                let rest: Vec<&str> = iter.by_ref().map(|s| s.as_str()).collect();
                if param.required && rest.is_empty() {
                    return Err(self.usage_message(command));
                }
                bound.insert(param.name.clone(), rest.join(" "));
                continue;
            }
            match iter.next() {
                Some(token) => {
                    bound.insert(param.name.clone(), token.clone());
                }
                None => {
                    if param.required {
                        return Err(self.usage_message(command));
                    }
                }
            }
        }
        Ok(bound)
    }

    fn usage_message(&self, command: &Command) -> String {
        format!(
            "Usage: {} - {}",
            render_usage(&command.usage),
            command.description
        )
    }

    /// Dispatches one already-tokenized command line. `name` is `tokens[0]`;
    /// the rest are parameter tokens (§4.7 "Dispatch").
    pub fn dispatch(
        &self,
        name: &str,
        tokens: &[String],
        room_code: i32,
        player: ClientId,
        original_message: &str,
    ) -> Vec<String> {
        let Some(command) = self.commands.get(name) else {
            return vec![format!("No command with name: {name}")];
        };

        if name == "help" {
            return self.dispatch_help(tokens.first().map(|s| s.as_str()));
        }

        let bound = match self.bind(command, tokens) {
            Ok(bound) => bound,
            Err(usage) => return vec![usage],
        };

        let mut ctx = CommandContext {
            room_code,
            player,
            original_message,
            replies: Vec::new(),
        };
        if let Err(CallError(message)) = (command.handler)(&mut ctx, &bound) {
            ctx.replies.push(message);
        }
        ctx.replies
    }

    fn dispatch_help(&self, target: Option<&str>) -> Vec<String> {
        match target {
            Some(name) => match self.commands.get(name) {
                Some(command) => vec![self.usage_message(command)],
                None => vec![format!("No command with name: {name}")],
            },
            None => self
                .order
                .iter()
                .filter_map(|name| self.commands.get(name))
                .map(|command| self.usage_message(command))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_respects_single_quoted_strings() {
        let tokens = tokenize("/kick 'big bob' was being mean");
        assert_eq!(tokens, vec!["/kick", "big bob", "was", "being", "mean"]);
    }

    #[test]
    fn tokenize_discards_empty_trailing_tokens() {
        let tokens = tokenize("kick   bob   ");
        assert_eq!(tokens, vec!["kick", "bob"]);
    }

    #[test]
    fn parse_usage_rejects_required_after_optional() {
        assert!(parse_usage("kick [reason] <name>").is_err());
    }

    #[test]
    fn parse_usage_rejects_rest_not_last() {
        assert!(parse_usage("kick <reason...> <name>").is_err());
    }

    #[test]
    fn parse_usage_rejects_empty_name() {
        assert!(parse_usage("").is_err());
    }

    #[test]
    fn usage_round_trips_through_render() {
        let parsed = parse_usage("kick <name> [reason...]").unwrap();
        let rendered = render_usage(&parsed);
        let reparsed = parse_usage(&rendered).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn dispatch_binds_required_and_rest_parameters() {
        let mut table = CommandTable::new();
        table
            .register(
                "kick <name> [reason...]",
                "Kicks a player.",
                Box::new(|ctx, params| {
                    ctx.reply(format!(
                        "kicked {} for {}",
                        params.get("name").unwrap(),
                        params.get("reason").cloned().unwrap_or_default()
                    ));
                    Ok(())
                }),
            )
            .unwrap();

        let tokens = tokenize("kick 'big bob' was being mean");
        let replies = table.dispatch(
            &tokens[0],
            &tokens[1..],
            1,
            ClientId(1),
            "/kick 'big bob' was being mean",
        );
        assert_eq!(replies, vec!["kicked big bob for was being mean"]);
    }

    #[test]
    fn dispatch_reports_missing_required_parameter() {
        let mut table = CommandTable::new();
        table
            .register("kick <name>", "Kicks a player.", Box::new(|_, _| Ok(())))
            .unwrap();
        let replies = table.dispatch("kick", &[], 1, ClientId(1), "/kick");
        assert!(replies[0].starts_with("Usage: kick <name>"));
    }

    #[test]
    fn dispatch_unknown_command_reports_name() {
        let table = CommandTable::new();
        let replies = table.dispatch("nope", &[], 1, ClientId(1), "/nope");
        assert_eq!(replies, vec!["No command with name: nope"]);
    }

    #[test]
    fn help_with_no_argument_lists_everything() {
        let mut table = CommandTable::new();
        table
            .register("kick <name>", "Kicks a player.", Box::new(|_, _| Ok(())))
            .unwrap();
        let replies = table.dispatch("help", &[], 1, ClientId(1), "/help");
        assert_eq!(replies.len(), 2);
    }

    #[test]
    fn handler_call_error_is_relayed_as_reply() {
        let mut table = CommandTable::new();
        table
            .register(
                "kick <name>",
                "Kicks a player.",
                Box::new(|_, _| Err(CallError("player not found".into()))),
            )
            .unwrap();
        let tokens = tokenize("kick bob");
        let replies = table.dispatch(&tokens[0], &tokens[1..], 1, ClientId(1), "/kick bob");
        assert_eq!(replies, vec!["player not found"]);
    }
}
