/// Longest title handed to the tree, in characters.
pub const MAX_TITLE_CHARS: usize = 256;

/// Clean a remote title for display.
///
/// Control characters (including terminal escape introducers) are dropped,
/// runs of whitespace collapse to one space, and the result is capped at
/// [`MAX_TITLE_CHARS`]. A title that ends up empty is replaced by `fallback`.
pub fn sanitize_title(title: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(title.len().min(MAX_TITLE_CHARS));
    let mut pending_space = false;
    let mut chars = 0;

    for c in title.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space {
            if chars + 1 >= MAX_TITLE_CHARS {
                break;
            }
            out.push(' ');
            chars += 1;
            pending_space = false;
        }
        if chars >= MAX_TITLE_CHARS {
            break;
        }
        out.push(c);
        chars += 1;
    }

    if out.is_empty() {
        fallback.to_string()
    } else {
        out
    }
}
