//! Text variation through alternative groups.
//!
//! `{a|b|c}` renders as one of `a`, `b` or `c`. Groups nest, and each group
//! picks independently and uniformly. There is no escape syntax.
//!
//! An unmatched `}` is kept as literal text. An unclosed `{` is kept as
//! literal text together with the `|` separators that follow it, while
//! groups nested inside it are still resolved. Use [`validate`] to reject
//! such templates up front.

use rand::Rng;

use crate::error::TemplateError;

/// Render `template` with the calling thread's RNG.
pub fn render(template: &str) -> String {
    render_with(template, &mut rand::thread_rng())
}

/// Render `template` with the given RNG.
pub fn render_with<R: Rng>(template: &str, rng: &mut R) -> String {
    let mut out = String::with_capacity(template.len());
    // One frame per open group, holding its alternatives so far.
    let mut groups: Vec<Vec<String>> = Vec::new();

    for ch in template.chars() {
        match ch {
            '{' => groups.push(vec![String::new()]),
            '|' => match groups.last_mut() {
                Some(alternatives) => alternatives.push(String::new()),
                None => out.push('|'),
            },
            '}' => match groups.pop() {
                Some(mut alternatives) => {
                    let pick = rng.gen_range(0..alternatives.len());
                    let chosen = alternatives.swap_remove(pick);
                    sink(&mut out, &mut groups).push_str(&chosen);
                }
                None => out.push('}'),
            },
            c => sink(&mut out, &mut groups).push(c),
        }
    }

    while let Some(alternatives) = groups.pop() {
        let literal = format!("{{{}", alternatives.join("|"));
        sink(&mut out, &mut groups).push_str(&literal);
    }
    out
}

/// Where text currently lands: the open alternative of the innermost
/// group, or the output.
fn sink<'a>(out: &'a mut String, groups: &'a mut [Vec<String>]) -> &'a mut String {
    match groups.last_mut().and_then(|alternatives| alternatives.last_mut()) {
        Some(current) => current,
        None => out,
    }
}

/// Check that every `{` has a matching `}`.
pub fn validate(template: &str) -> Result<(), TemplateError> {
    let mut open: Vec<usize> = Vec::new();
    for (offset, ch) in template.char_indices() {
        match ch {
            '{' => open.push(offset),
            '}' => {
                if open.pop().is_none() {
                    return Err(TemplateError::UnopenedGroup { offset });
                }
            }
            _ => {}
        }
    }
    match open.first() {
        Some(&offset) => Err(TemplateError::UnclosedGroup { offset }),
        None => Ok(()),
    }
}

/// Number of distinct choice paths through `template`, saturating at
/// `u128::MAX`. Literal text counts as one.
pub fn variant_count(template: &str) -> u128 {
    struct Frame {
        /// Sum over finished alternatives.
        finished: u128,
        /// Product over the groups of the current alternative.
        current: u128,
        /// Product over every group seen in this frame.
        all: u128,
    }

    let mut total: u128 = 1;
    let mut frames: Vec<Frame> = Vec::new();

    fn absorb(total: &mut u128, frames: &mut [Frame], count: u128) {
        match frames.last_mut() {
            Some(parent) => {
                parent.current = parent.current.saturating_mul(count);
                parent.all = parent.all.saturating_mul(count);
            }
            None => *total = total.saturating_mul(count),
        }
    }

    for ch in template.chars() {
        match ch {
            '{' => frames.push(Frame {
                finished: 0,
                current: 1,
                all: 1,
            }),
            '|' => {
                if let Some(frame) = frames.last_mut() {
                    frame.finished = frame.finished.saturating_add(frame.current);
                    frame.current = 1;
                }
            }
            '}' => {
                if let Some(frame) = frames.pop() {
                    let count = frame.finished.saturating_add(frame.current);
                    absorb(&mut total, &mut frames, count);
                }
            }
            _ => {}
        }
    }

    // Unclosed groups are literal, so every nested choice in them still counts.
    while let Some(frame) = frames.pop() {
        absorb(&mut total, &mut frames, frame.all);
    }
    total
}
