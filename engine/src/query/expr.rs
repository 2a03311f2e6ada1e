//! The signature text grammar.
//!
//! ```text
//! signature := column ("," column)*
//! column    := [kind "."] ["!" | "?"] name ("|" name)*
//! kind      := SELF | OWNED | SHARED | CONTAINER | SYSTEM | CASCADE | entity-name
//! ```
//!
//! `!` is NOT, `?` is OPTIONAL, `|` builds an OR over component variants and
//! the top-level `,` is AND. Ambiguous combinations (NOT or OPTIONAL with OR)
//! are rejected. An operator is accepted on either side of the kind prefix.

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::query::{Column, Oper, Signature, Source};

/// Parse a signature expression. `resolve` maps a name to a handle; it is
/// consulted for component names and for fixed-entity source kinds.
pub fn parse(expr: &str, resolve: &dyn Fn(&str) -> Option<Entity>) -> Result<Signature> {
    if expr.trim().is_empty() {
        return Err(Error::InvalidExpression(expr.to_string()));
    }

    let mut columns = Vec::new();
    for element in expr.split(',') {
        columns.push(parse_column(element.trim(), resolve)?);
    }
    Ok(Signature::new(columns))
}

fn parse_column(element: &str, resolve: &dyn Fn(&str) -> Option<Entity>) -> Result<Column> {
    if element.is_empty() {
        return Err(Error::InvalidExpression(element.to_string()));
    }

    let mut rest = element;
    let mut oper = Oper::And;

    // Operator before the kind prefix.
    if let Some(stripped) = take_oper(rest, &mut oper) {
        rest = stripped;
    }

    // Optional dot-separated source kind.
    let mut source = Source::This;
    if let Some(dot) = rest.find('.') {
        let (kind, tail) = (rest[..dot].trim(), rest[dot + 1..].trim());
        source = match kind {
            "" => Source::Empty,
            "SELF" => Source::This,
            "OWNED" => Source::Owned,
            "SHARED" => Source::Shared,
            "CONTAINER" => Source::Container,
            "SYSTEM" => Source::System,
            "CASCADE" => Source::Cascade,
            name => Source::Entity(
                resolve(name)
                    .ok_or_else(|| Error::InvalidArgument(format!("unknown entity '{name}'")))?,
            ),
        };
        rest = tail;
    }

    // Operator after the kind prefix.
    if let Some(stripped) = take_oper(rest, &mut oper) {
        rest = stripped;
    }

    if rest.is_empty() {
        return Err(Error::InvalidExpression(element.to_string()));
    }

    // OR variants.
    let names: Vec<&str> = rest.split('|').map(str::trim).collect();
    if names.len() > 1 {
        if oper != Oper::And {
            // NOT / OPTIONAL combined with OR is ambiguous.
            return Err(Error::InvalidExpression(element.to_string()));
        }
        oper = Oper::Or;
    }

    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        if name.is_empty() {
            return Err(Error::InvalidExpression(element.to_string()));
        }
        ids.push(
            resolve(name)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown component '{name}'")))?,
        );
    }

    Ok(Column { source, oper, ids })
}

fn take_oper<'a>(rest: &'a str, oper: &mut Oper) -> Option<&'a str> {
    let stripped = if let Some(s) = rest.strip_prefix('!') {
        *oper = Oper::Not;
        s
    } else if let Some(s) = rest.strip_prefix('?') {
        *oper = Oper::Optional;
        s
    } else {
        return None;
    };
    Some(stripped.trim_start())
}
