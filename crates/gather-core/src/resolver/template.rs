//! Macro expansion for source descriptors.
//!
//! The only substitution syntax is `{{ name "argument" }}`: a registered
//! resolver name followed by one double-quoted string argument (`\"`, `\\`,
//! `\n` and `\t` escapes are recognised). Expansion is a single pass. A resolver's
//! output is inserted verbatim and never parsed again, so output that
//! itself contains `{{ ... }}` stays literal.

use crate::context::GatherContext;
use crate::error::{GatherError, Result};

use super::ResolverRegistry;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// One piece of a parsed descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Invocation { resolver: String, argument: String },
}

/// A parsed source descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a descriptor into literal and invocation segments.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let err = |message: String| GatherError::Template {
            descriptor: descriptor.to_string(),
            message,
        };

        let mut segments = Vec::new();
        let mut rest = descriptor;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            let literal = &rest[..start];
            if !literal.is_empty() {
                segments.push(Segment::Literal(literal.to_string()));
            }

            let body_start = start + OPEN.len();
            let (segment, consumed) = parse_invocation(&rest[body_start..])
                .map_err(|message| err(format!("{} at offset {}", message, offset + start)))?;
            segments.push(segment);

            let advance = body_start + consumed;
            offset += advance;
            rest = &rest[advance..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// `(resolver, argument)` pairs in order of appearance.
    pub fn invocations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Invocation { resolver, argument } => Some((resolver.as_str(), argument.as_str())),
            Segment::Literal(_) => None,
        })
    }

    pub fn has_invocations(&self) -> bool {
        self.invocations().next().is_some()
    }
}

/// Parse `name "argument" }}` (the text after `{{`).
///
/// Returns the segment and the number of bytes consumed, including `}}`.
fn parse_invocation(input: &str) -> std::result::Result<(Segment, usize), String> {
    let mut pos = skip_whitespace(input, 0);

    let name_start = pos;
    for (i, c) in input[pos..].char_indices() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if !valid {
            break;
        }
        pos = name_start + i + c.len_utf8();
    }
    if pos == name_start {
        return Err("expected resolver name after \"{{\"".to_string());
    }
    let resolver = input[name_start..pos].to_string();

    pos = skip_whitespace(input, pos);
    if !input[pos..].starts_with('"') {
        return Err(format!(
            "expected quoted argument for resolver {:?}",
            resolver
        ));
    }
    pos += 1;

    let mut argument = String::new();
    let mut chars = input[pos..].char_indices();
    let mut closed = false;
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                pos += i + 1;
                closed = true;
                break;
            }
            '\\' => match chars.next() {
                Some((_, escaped @ ('"' | '\\'))) => argument.push(escaped),
                Some((_, 'n')) => argument.push('\n'),
                Some((_, 't')) => argument.push('\t'),
                Some((_, other)) => {
                    return Err(format!("unsupported escape \"\\{}\" in argument", other));
                }
                None => break,
            },
            _ => argument.push(c),
        }
    }
    if !closed {
        return Err("unterminated argument string".to_string());
    }

    pos = skip_whitespace(input, pos);
    if !input[pos..].starts_with(CLOSE) {
        return Err(format!(
            "expected \"}}}}\" after argument to resolver {:?}",
            resolver
        ));
    }
    pos += CLOSE.len();

    Ok((Segment::Invocation { resolver, argument }, pos))
}

fn skip_whitespace(input: &str, pos: usize) -> usize {
    pos + input[pos..]
        .find(|c: char| !c.is_whitespace())
        .unwrap_or(input.len() - pos)
}

/// Expand every macro in `descriptor` using `registry`.
///
/// The descriptor is parsed and every resolver name checked before any
/// resolver runs, so a malformed descriptor or unknown name fails without
/// side effects. Each invocation is then run once, in order. The first
/// failure aborts the call and no partial expansion is returned.
pub async fn resolve(
    ctx: &GatherContext,
    registry: &ResolverRegistry,
    descriptor: &str,
) -> Result<String> {
    let template = Template::parse(descriptor)?;
    if !template.has_invocations() {
        return Ok(descriptor.to_string());
    }

    for (name, _) in template.invocations() {
        if !registry.contains(name) {
            return Err(GatherError::UnknownResolver {
                name: name.to_string(),
            });
        }
    }

    let mut resolved = String::with_capacity(descriptor.len());
    for segment in template.segments() {
        match segment {
            Segment::Literal(text) => resolved.push_str(text),
            Segment::Invocation { resolver, argument } => {
                let Some(handler) = registry.get(resolver) else {
                    return Err(GatherError::UnknownResolver {
                        name: resolver.clone(),
                    });
                };
                tracing::debug!(resolver = %resolver, argument = %argument, "invoking resolver");
                let value = ctx
                    .run(handler.resolve(ctx, argument))
                    .await?
                    .map_err(|source| GatherError::Resolver {
                        name: resolver.clone(),
                        source,
                    })?;
                resolved.push_str(&value);
            }
        }
    }

    Ok(resolved)
}
