//! Reliability scoring: a cheap, language-agnostic proxy for "is this usable
//! text or OCR garbage".

/// Fraction of alphanumeric characters in `text`, clamped to `[0, 1]` and
/// rounded to four decimal places. Empty input scores `0.0`.
pub fn score(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let alnum = text.chars().filter(|c| c.is_alphanumeric()).count();
    let ratio = (alnum as f64 / total as f64).clamp(0.0, 1.0);
    (ratio * 10_000.0).round() / 10_000.0
}

/// The median of a sequence of reliability scores. Empty input is `0.0`.
/// Ties at even cardinality average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Evenly spaced, deduplicated, ascending 0-based page indices across a
/// document, always including the first and last page when `target >= 2`.
pub fn sample_page_indices(total_pages: usize, target: usize) -> Vec<usize> {
    if total_pages == 0 {
        return vec![];
    }
    let n = target.clamp(1, total_pages);
    if n == 1 {
        return vec![0];
    }
    let step = (total_pages - 1) as f64 / (n - 1) as f64;
    let mut idxs: Vec<usize> = (0..n)
        .map(|i| {
            let raw = (i as f64 * step).round() as i64;
            raw.clamp(0, total_pages as i64 - 1) as usize
        })
        .collect();
    idxs.sort_unstable();
    idxs.dedup();
    idxs
}

/// Heuristic: treat a sample of page texts as "likely scan-only" (i.e. worth
/// escalating straight to OCR) when there's very little text or what's there
/// is very noisy.
pub fn likely_scan_only(samples: &[String], min_chars: usize, rel_cap: f64) -> bool {
    let total_chars: usize = samples.iter().map(|s| s.chars().count()).sum();
    if total_chars < min_chars {
        return true;
    }
    let joined = samples.join(" ");
    score(&joined) < rel_cap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_scores_zero() {
        assert_eq!(score(""), 0.0);
    }

    #[test]
    fn all_alnum_scores_one() {
        assert_eq!(score("aaaa"), 1.0);
    }

    #[test]
    fn all_punctuation_scores_zero() {
        assert_eq!(score("!!!!"), 0.0);
    }

    #[test]
    fn mixed_text_rounds_to_four_decimals() {
        assert_eq!(score("ab12!!"), 0.6667);
    }

    #[test]
    fn median_of_empty_is_zero() {
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn median_odd_count() {
        assert_eq!(median(&[0.1, 0.5, 0.9]), 0.5);
    }

    #[test]
    fn median_even_count_averages_middle() {
        assert_eq!(median(&[0.2, 0.4, 0.6, 0.8]), 0.5);
    }

    #[test]
    fn sample_indices_include_first_and_last() {
        let idxs = sample_page_indices(100, 6);
        assert_eq!(idxs.first(), Some(&0));
        assert_eq!(idxs.last(), Some(&99));
        assert!(idxs.len() <= 6);
    }

    #[test]
    fn sample_indices_single_page() {
        assert_eq!(sample_page_indices(1, 6), vec![0]);
    }

    #[test]
    fn sample_indices_empty_doc() {
        assert_eq!(sample_page_indices(0, 6), Vec::<usize>::new());
    }

    #[test]
    fn scan_only_detects_short_samples() {
        assert!(likely_scan_only(&["a".to_owned()], 40, 0.15));
    }

    #[test]
    fn scan_only_detects_noisy_samples() {
        let noisy = "@#$% ^&*( )_+-= {}[]|\\:;\"'<>,.?/~`".repeat(3);
        assert!(likely_scan_only(&[noisy], 40, 0.15));
    }

    #[test]
    fn scan_only_false_for_real_text() {
        let text = "This is a perfectly ordinary paragraph of English prose.".to_owned();
        assert!(!likely_scan_only(&[text], 40, 0.15));
    }
}
