//! Re-ranking: combined scores from raw cosine, kind/path importance, and
//! file recency, plus the top-K selection strategies.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::constants::TOPK_BUBBLE_LIMIT;

/// Weights of the combined score.
const W_COSINE: f32 = 0.7;
const W_IMPORTANCE: f32 = 0.2;
const W_RECENCY: f32 = 0.1;

/// `0.7·cos + 0.2·(cos × importance) + 0.1·(cos × recency)`
pub fn combined_score(cosine: f32, importance: f32, recency: f32) -> f32 {
    W_COSINE * cosine + W_IMPORTANCE * cosine * importance + W_RECENCY * cosine * recency
}

/// Recency multiplier by file age.
pub fn recency_factor(modified_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let age_days = (now - modified_at).num_days();
    if age_days <= 7 {
        1.1
    } else if age_days <= 30 {
        1.05
    } else if age_days <= 90 {
        1.0
    } else {
        0.95
    }
}

fn auth_method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)authenticate|authorize|login|signin|validatetoken|credential").unwrap()
    })
}

fn generated_filename(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    lower.contains(".designer.") || lower.contains(".g.") || lower.contains(".g.i.")
}

/// Importance weight for one entry, evaluated top to bottom with first
/// match winning. Path hints are checked before kind hints; the ordering
/// is fixed so two processes rank identically.
pub fn importance(kind_tag: &str, path: &str, text: &str) -> f32 {
    let lower_path = path.to_lowercase();
    let file_name = lower_path.rsplit('/').next().unwrap_or("").to_string();
    let dir_part = lower_path
        .rsplit_once('/')
        .map(|(d, _)| format!("{}/", d))
        .unwrap_or_default();
    let dir_has = |needle: &str| dir_part.contains(needle);

    // Path hints.
    if file_name.contains("auth")
        || file_name.contains("login")
        || file_name.contains("security")
        || dir_has("identity")
        || dir_has("auth")
        || dir_has("security")
    {
        return 1.50;
    }
    if file_name.starts_with("program.") || file_name.starts_with("startup.") {
        return 1.40;
    }
    if file_name.contains("appsettings") || file_name.contains("config") {
        return 1.30;
    }
    if dir_has("controllers") || file_name.contains("controller") {
        return 1.20;
    }
    if dir_has("services") || dir_has("handlers") {
        return 1.15;
    }
    if dir_has("models") || dir_has("entities") {
        return 1.10;
    }
    if file_name.ends_with(".razor") || dir_has("components") {
        return 1.10;
    }
    if dir_has("test") || dir_has("spec") {
        return 0.80;
    }
    if generated_filename(&file_name) {
        return 0.70;
    }

    // Kind hints.
    if kind_tag.ends_with("-auth") {
        return 1.50;
    }
    if kind_tag.ends_with("-security") {
        return 1.40;
    }
    if kind_tag.ends_with("-config") {
        return 1.30;
    }
    if kind_tag == "class-controller" {
        return 1.20;
    }
    if kind_tag == "class-service" {
        return 1.15;
    }
    if is_method_kind(kind_tag) && auth_method_re().is_match(text) {
        return 1.30;
    }
    if kind_tag == "class" || kind_tag == "interface" {
        return 1.10;
    }
    if kind_tag == "sliding_window" {
        return 0.90;
    }
    if kind_tag == "generated" {
        return 0.80;
    }

    1.00
}

fn is_method_kind(kind_tag: &str) -> bool {
    kind_tag.starts_with("method")
        || kind_tag.starts_with("local_function")
        || kind_tag.starts_with("c-function")
        || kind_tag.starts_with("razor-method")
}

/// A scored candidate slot before materialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub slot: usize,
    pub cosine: f32,
    pub combined: f32,
}

/// Select the top `k` candidates by combined score.
///
/// For small `k` an online bubble of length ≤ k avoids sorting the whole
/// score array (O(n·k)); larger requests sort. Ties keep insertion order
/// in both paths.
pub fn select_top_k(candidates: Vec<Scored>, k: usize) -> Vec<Scored> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    if k <= TOPK_BUBBLE_LIMIT {
        let mut top: Vec<Scored> = Vec::with_capacity(k + 1);
        for candidate in candidates {
            if top.len() < k {
                top.push(candidate);
                bubble_up(&mut top);
            } else if candidate.combined > top[k - 1].combined {
                top[k - 1] = candidate;
                bubble_up(&mut top);
            }
        }
        return top;
    }

    let mut all = candidates;
    // Stable sort: equal combined scores keep slot (insertion) order.
    all.sort_by(|a, b| b.combined.partial_cmp(&a.combined).unwrap_or(std::cmp::Ordering::Equal));
    all.truncate(k);
    all
}

/// Move the last element up to its place; strict comparison keeps equal
/// scores behind earlier insertions.
fn bubble_up(top: &mut [Scored]) {
    let mut i = top.len() - 1;
    while i > 0 && top[i].combined > top[i - 1].combined {
        top.swap(i, i - 1);
        i -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_recency_tiers() {
        let now = Utc::now();
        assert_eq!(recency_factor(now - Duration::days(1), now), 1.1);
        assert_eq!(recency_factor(now - Duration::days(20), now), 1.05);
        assert_eq!(recency_factor(now - Duration::days(60), now), 1.0);
        assert_eq!(recency_factor(now - Duration::days(200), now), 0.95);
    }

    #[test]
    fn test_combined_score_formula() {
        let combined = combined_score(0.8, 1.5, 1.1);
        let expected = 0.7 * 0.8 + 0.2 * 0.8 * 1.5 + 0.1 * 0.8 * 1.1;
        assert!((combined - expected).abs() < 1e-6);
    }

    #[test]
    fn test_importance_path_hints_win_over_kind() {
        // Auth path hint (1.50) fires before the sliding_window kind (0.90).
        assert_eq!(
            importance("sliding_window", "/p/Auth/Jwt.cs", ""),
            1.50
        );
    }

    #[test]
    fn test_importance_table_rows() {
        assert_eq!(importance("method", "/p/LoginService.cs", ""), 1.50);
        assert_eq!(importance("class", "/p/Program.cs", ""), 1.40);
        assert_eq!(importance("class", "/p/appsettings.json", ""), 1.30);
        assert_eq!(importance("class", "/p/Controllers/OrderController.cs", ""), 1.20);
        assert_eq!(importance("class", "/p/Services/Order.cs", ""), 1.15);
        assert_eq!(importance("class", "/p/Models/Order.cs", ""), 1.10);
        assert_eq!(importance("razor-code", "/p/Counter.razor", ""), 1.10);
        assert_eq!(importance("class", "/p/Tests/OrderTests.cs", ""), 0.80);
        assert_eq!(importance("generated", "/p/Form1.Designer.cs", ""), 0.70);

        assert_eq!(importance("method-auth", "/p/Plain.cs", ""), 1.50);
        assert_eq!(importance("method-security", "/p/Plain.cs", ""), 1.40);
        assert_eq!(importance("enum-config", "/p/Plain.cs", ""), 1.30);
        assert_eq!(importance("class-controller", "/p/Plain.cs", ""), 1.20);
        assert_eq!(importance("class-service", "/p/Plain.cs", ""), 1.15);
        assert_eq!(
            importance("method", "/p/Plain.cs", "public void Authenticate(User u)"),
            1.30
        );
        assert_eq!(importance("class", "/p/Plain.cs", ""), 1.10);
        assert_eq!(importance("interface", "/p/Plain.cs", ""), 1.10);
        assert_eq!(importance("sliding_window", "/p/Plain.cs", ""), 0.90);
        assert_eq!(importance("generated", "/p/Plain.cs", ""), 0.80);
        assert_eq!(importance("property", "/p/Plain.cs", "int X"), 1.00);
    }

    fn scored(slot: usize, combined: f32) -> Scored {
        Scored {
            slot,
            cosine: combined,
            combined,
        }
    }

    #[test]
    fn test_bubble_top_k() {
        let candidates = vec![
            scored(0, 0.2),
            scored(1, 0.9),
            scored(2, 0.5),
            scored(3, 0.7),
            scored(4, 0.1),
        ];
        let top = select_top_k(candidates, 3);
        assert_eq!(
            top.iter().map(|s| s.slot).collect::<Vec<_>>(),
            vec![1, 3, 2]
        );
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let candidates = vec![scored(0, 0.5), scored(1, 0.5), scored(2, 0.5)];
        let top = select_top_k(candidates.clone(), 2);
        assert_eq!(top.iter().map(|s| s.slot).collect::<Vec<_>>(), vec![0, 1]);

        // Sorting path behaves identically.
        let mut many: Vec<Scored> = (0..40).map(|i| scored(i, 0.5)).collect();
        many.push(scored(99, 0.9));
        let top = select_top_k(many, 25);
        assert_eq!(top[0].slot, 99);
        assert_eq!(top[1].slot, 0);
        assert_eq!(top[24].slot, 23);
    }

    #[test]
    fn test_k_zero_and_k_over_len() {
        assert!(select_top_k(vec![scored(0, 0.5)], 0).is_empty());
        let top = select_top_k(vec![scored(0, 0.5), scored(1, 0.8)], 10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].slot, 1);
    }
}
