//! Text rendering for container diagnostics.
//!
//! Fatal configuration errors are read by whoever wired the composition
//! root, usually at startup. These helpers keep those messages short:
//! type paths are trimmed to their last segments, resolution chains are
//! drawn as arrows and unknown service ids get "did you mean" hints.

/// Renders a resolution chain, outermost service first.
///
/// # Examples
/// ```
/// use ombor_support::rendering::render_chain;
///
/// let chain = ["http_server", "user_service", "user_repo"];
/// assert_eq!(render_chain(&chain), "http_server → user_service → user_repo");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    let mut out = String::new();
    for (i, link) in chain.iter().enumerate() {
        if i > 0 {
            out.push_str(" → ");
        }
        out.push_str(link.as_ref());
    }
    out
}

/// Strips module paths from a type name, keeping generic structure.
///
/// ```
/// use ombor_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("app::repo::PgUsers"), "PgUsers");
/// assert_eq!(
///     shorten_type_name("alloc::sync::Arc<dyn app::repo::UserRepo + Send>"),
///     "Arc<dyn UserRepo + Send>",
/// );
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut out = String::with_capacity(full_name.len());
    let mut segment_start = 0;

    for (idx, ch) in full_name.char_indices() {
        if matches!(ch, '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&') {
            out.push_str(last_path_segment(&full_name[segment_start..idx]));
            out.push(ch);
            segment_start = idx + ch.len_utf8();
        }
    }
    out.push_str(last_path_segment(&full_name[segment_start..]));
    out
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Suggests registered ids close to `requested`.
///
/// Ids are compared case-insensitively with `-` and `_` treated alike.
/// Containment ranks highest, then small edit distances.
///
/// ```
/// use ombor_support::rendering::suggest_similar;
///
/// let ids = ["user_repo", "token_repo", "http_client"];
/// assert_eq!(suggest_similar("user_rep", &ids, 2), vec!["user_repo"]);
/// ```
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let wanted = normalize(requested);
    if wanted.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &str)> = available
        .iter()
        .filter_map(|&candidate| {
            let have = normalize(candidate);
            if have == wanted {
                return None;
            }
            if have.contains(&wanted) || wanted.contains(&have) {
                return Some((0, candidate));
            }
            let distance = edit_distance(&wanted, &have);
            let budget = (wanted.len().max(have.len()) / 3).max(1);
            (distance <= budget).then_some((distance, candidate))
        })
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(_, id)| id.to_string())
        .collect()
}

fn normalize(id: &str) -> String {
    id.chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Levenshtein distance over chars, single-row table.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(ca != *cb);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }
    row[b.len()]
}
