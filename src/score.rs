use accessly_core_types::Issue;

const PENALTY_PER_SEVERE_ISSUE: usize = 10;

/// `max(0, 100 - 10 * n)` where `n` counts serious and critical issues.
pub fn calculate_score(issues: &[Issue]) -> u8 {
    let severe = issues.iter().filter(|issue| issue.is_severe()).count();
    100usize.saturating_sub(severe.saturating_mul(PENALTY_PER_SEVERE_ISSUE)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessly_core_types::Impact;

    fn issue(impact: Option<Impact>) -> Issue {
        Issue::new("rule", "description", impact)
    }

    #[test]
    fn empty_audit_scores_100() {
        assert_eq!(calculate_score(&[]), 100);
    }

    #[test]
    fn only_serious_and_critical_count() {
        let issues = vec![
            issue(Some(Impact::Critical)),
            issue(Some(Impact::Moderate)),
            issue(Some(Impact::Minor)),
            issue(None),
            issue(Some(Impact::Serious)),
        ];
        assert_eq!(calculate_score(&issues), 80);
    }

    #[test]
    fn floors_at_zero() {
        let issues: Vec<Issue> = (0..25).map(|_| issue(Some(Impact::Serious))).collect();
        assert_eq!(calculate_score(&issues), 0);
        assert_eq!(calculate_score(&issues[..10]), 0);
        assert_eq!(calculate_score(&issues[..9]), 10);
    }
}
