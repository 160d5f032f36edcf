//! Synthetic crisis-response selection: a timed state machine keyed by
//! elapsed seconds since the originating request, plus the anti-repeat
//! rotation used for unreachable members' availability messages.

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

/// Response category, chosen by elapsed time since the crisis started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePhase {
    Validation,
    Grounding,
    GoalGuidance,
    StreakProtection,
    LongTermVision,
    FollowUp,
}

impl ResponsePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Grounding => "grounding",
            Self::GoalGuidance => "goal_guidance",
            Self::StreakProtection => "streak_protection",
            Self::LongTermVision => "long_term_vision",
            Self::FollowUp => "follow_up",
        }
    }
}

pub fn phase_for_elapsed(elapsed_secs: u64) -> ResponsePhase {
    match elapsed_secs {
        0..30 => ResponsePhase::Validation,
        30..60 => ResponsePhase::Grounding,
        60..120 => ResponsePhase::GoalGuidance,
        120..300 => ResponsePhase::StreakProtection,
        300..900 => ResponsePhase::LongTermVision,
        _ => ResponsePhase::FollowUp,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakTier {
    Low,
    Medium,
    High,
}

pub fn streak_tier(streak: i64) -> StreakTier {
    if streak < 3 {
        StreakTier::Low
    } else if streak <= 7 {
        StreakTier::Medium
    } else {
        StreakTier::High
    }
}

// Template tables. `{name}` and `{streak}` are substituted at render time.

const VALIDATION: &[&str] = &[
    "{name}, what you're feeling right now is real, and reaching out was the right move.",
    "This urge is a wave, {name}. It peaks and it passes. You don't have to act on it.",
    "You noticed the moment and asked for support — that's exactly what this pod is for, {name}.",
    "Right now counts, {name}. Nothing before this minute decides what happens next.",
];

const GROUNDING: &[&str] = &[
    "Try this, {name}: name five things you can see, four you can touch, three you can hear.",
    "Take ten slow breaths, counting each exhale. The urge loses ground every time you count.",
    "Stand up, get a glass of water, and walk to another room. Change the scenery for two minutes.",
    "Put both feet flat on the floor and press down. Notice the pressure. Stay there for one minute.",
];

const GOAL_GUIDANCE: &[(&str, &[&str])] = &[
    (
        "fitness",
        &[
            "Skipping one workout never ends a plan, {name} — a five-minute walk right now keeps the habit alive.",
            "Drop the session you planned and do the smallest version instead: ten squats, right where you are.",
        ],
    ),
    (
        "sobriety",
        &[
            "Urge surfing works, {name}: set a 15-minute timer and promise yourself nothing before it rings.",
            "Call it what it is — a craving, not a command. It has a half-life, and you've outlasted it before.",
        ],
    ),
    (
        "study",
        &[
            "Shrink the task, {name}: open the material and read one paragraph. Momentum does the rest.",
            "Twenty-five minutes, one timer, phone in another room. You only owe yourself one block.",
        ],
    ),
    (
        "focus",
        &[
            "Close every tab that isn't the one thing, {name}. One tab, one task, ten minutes.",
            "Write down the distraction on paper so it stops looping, then come back to the task.",
        ],
    ),
];

const STREAK_LOW: &[&str] = &[
    "You're {streak} days in, {name} — the hardest days are the first ones, and you're already in them.",
    "Every long streak started exactly where you are now. Protect today and tomorrow gets easier.",
];

const STREAK_MEDIUM: &[&str] = &[
    "{streak} days, {name}. That's a real foundation — one rough evening doesn't get to take it.",
    "You've shown up {streak} days straight. Tonight is one decision, not a referendum.",
];

const STREAK_HIGH: &[&str] = &[
    "{streak} days is not luck, {name} — it's a system that works. Trust the system for one more hour.",
    "Think about day one versus day {streak}. You are not the same person who started. Act like the person you are now.",
];

const LONG_TERM_VISION: &[&str] = &[
    "Picture three months from now, {name}. Which version of tonight does that person thank you for?",
    "This goal mattered enough to start. The reason you started is still true right now.",
    "One hard night is a page, not the story, {name}. Keep writing the story you picked.",
];

const FOLLOW_UP: &[&str] = &[
    "Still here, {name}. How are you doing now compared to when you first reached out?",
    "It's been a while — check in with yourself, {name}: has the wave dropped at all?",
    "Whatever happened in the last stretch, the next right move is small. What's one thing you can do in the next five minutes?",
];

/// Inputs for one synthetic response.
#[derive(Debug)]
pub struct SyntheticRequest<'a> {
    pub display_name: &'a str,
    pub current_streak: i64,
    pub goal_category: Option<&'a str>,
    pub elapsed_secs: u64,
    /// Texts already shown in this conversation. Entries still unshown are
    /// preferred; once the category is exhausted, anything may repeat.
    pub already_shown: &'a [String],
}

/// Select and render a synthetic response.
pub fn synthetic_response<R: Rng + ?Sized>(req: &SyntheticRequest<'_>, rng: &mut R) -> (ResponsePhase, String) {
    let phase = phase_for_elapsed(req.elapsed_secs);
    let entries = entries_for(phase, req.current_streak, req.goal_category);

    let rendered: Vec<String> = entries
        .iter()
        .map(|t| render(t, req.display_name, req.current_streak))
        .collect();

    let fresh: Vec<&String> = rendered
        .iter()
        .filter(|r| !req.already_shown.contains(r))
        .collect();

    let text = if fresh.is_empty() {
        rendered[rng.random_range(0..rendered.len())].clone()
    } else {
        fresh[rng.random_range(0..fresh.len())].clone()
    };

    (phase, text)
}

fn entries_for(phase: ResponsePhase, streak: i64, goal_category: Option<&str>) -> &'static [&'static str] {
    match phase {
        ResponsePhase::Validation => VALIDATION,
        ResponsePhase::Grounding => GROUNDING,
        ResponsePhase::GoalGuidance => goal_category
            .and_then(|goal| {
                GOAL_GUIDANCE
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(goal))
                    .map(|(_, entries)| *entries)
            })
            // No entries for this goal: fall back to a distraction technique.
            .unwrap_or(GROUNDING),
        ResponsePhase::StreakProtection => match streak_tier(streak) {
            StreakTier::Low => STREAK_LOW,
            StreakTier::Medium => STREAK_MEDIUM,
            StreakTier::High => STREAK_HIGH,
        },
        ResponsePhase::LongTermVision => LONG_TERM_VISION,
        ResponsePhase::FollowUp => FOLLOW_UP,
    }
}

fn render(template: &str, name: &str, streak: i64) -> String {
    template
        .replace("{name}", name)
        .replace("{streak}", &streak.to_string())
}

/// Anti-repeat rotation over availability-message candidates: exclude the
/// previously shown member when more than one candidate remains, then pick
/// uniformly at random.
pub fn rotate_choice<R: Rng + ?Sized>(
    candidates: &[Uuid],
    last_shown: Option<Uuid>,
    rng: &mut R,
) -> Option<Uuid> {
    if candidates.is_empty() {
        return None;
    }
    let eligible: Vec<Uuid> = if candidates.len() > 1 {
        match last_shown {
            Some(last) => {
                let filtered: Vec<Uuid> = candidates.iter().copied().filter(|c| *c != last).collect();
                if filtered.is_empty() { candidates.to_vec() } else { filtered }
            }
            None => candidates.to_vec(),
        }
    } else {
        candidates.to_vec()
    };
    Some(eligible[rng.random_range(0..eligible.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_boundaries() {
        assert_eq!(phase_for_elapsed(0), ResponsePhase::Validation);
        assert_eq!(phase_for_elapsed(29), ResponsePhase::Validation);
        assert_eq!(phase_for_elapsed(30), ResponsePhase::Grounding);
        assert_eq!(phase_for_elapsed(59), ResponsePhase::Grounding);
        assert_eq!(phase_for_elapsed(60), ResponsePhase::GoalGuidance);
        assert_eq!(phase_for_elapsed(119), ResponsePhase::GoalGuidance);
        assert_eq!(phase_for_elapsed(120), ResponsePhase::StreakProtection);
        assert_eq!(phase_for_elapsed(299), ResponsePhase::StreakProtection);
        assert_eq!(phase_for_elapsed(300), ResponsePhase::LongTermVision);
        assert_eq!(phase_for_elapsed(899), ResponsePhase::LongTermVision);
        assert_eq!(phase_for_elapsed(900), ResponsePhase::FollowUp);
        assert_eq!(phase_for_elapsed(100_000), ResponsePhase::FollowUp);
    }

    #[test]
    fn streak_tiers() {
        assert_eq!(streak_tier(0), StreakTier::Low);
        assert_eq!(streak_tier(2), StreakTier::Low);
        assert_eq!(streak_tier(3), StreakTier::Medium);
        assert_eq!(streak_tier(7), StreakTier::Medium);
        assert_eq!(streak_tier(8), StreakTier::High);
    }

    #[test]
    fn placeholders_are_substituted() {
        let req = SyntheticRequest {
            display_name: "Sam",
            current_streak: 5,
            goal_category: None,
            elapsed_secs: 150,
            already_shown: &[],
        };
        let (phase, text) = synthetic_response(&req, &mut rand::rng());
        assert_eq!(phase, ResponsePhase::StreakProtection);
        assert!(!text.contains("{name}"));
        assert!(!text.contains("{streak}"));
        assert!(text.contains('5') || text.contains("Sam"));
    }

    #[test]
    fn unknown_goal_falls_back_to_grounding() {
        assert_eq!(entries_for(ResponsePhase::GoalGuidance, 0, Some("juggling")), GROUNDING);
        assert_eq!(entries_for(ResponsePhase::GoalGuidance, 0, None), GROUNDING);
        assert_ne!(entries_for(ResponsePhase::GoalGuidance, 0, Some("fitness")), GROUNDING);
    }

    #[test]
    fn avoids_already_shown_until_exhausted() {
        let mut rng = rand::rng();
        let mut shown: Vec<String> = Vec::new();
        // Draw as many times as there are validation entries; each draw must
        // be fresh until the pool is empty.
        for _ in 0..VALIDATION.len() {
            let req = SyntheticRequest {
                display_name: "Kim",
                current_streak: 0,
                goal_category: None,
                elapsed_secs: 0,
                already_shown: &shown,
            };
            let (_, text) = synthetic_response(&req, &mut rng);
            assert!(!shown.contains(&text));
            shown.push(text);
        }
        // Pool exhausted: repeats allowed, call must still succeed.
        let req = SyntheticRequest {
            display_name: "Kim",
            current_streak: 0,
            goal_category: None,
            elapsed_secs: 0,
            already_shown: &shown,
        };
        let (_, text) = synthetic_response(&req, &mut rng);
        assert!(shown.contains(&text));
    }

    #[test]
    fn rotation_never_repeats_with_two_or_more() {
        let mut rng = rand::rng();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let candidates = vec![a, b, c];

        let mut last = None;
        for _ in 0..50 {
            let chosen = rotate_choice(&candidates, last, &mut rng).unwrap();
            if let Some(prev) = last {
                assert_ne!(chosen, prev);
            }
            last = Some(chosen);
        }
    }

    #[test]
    fn rotation_single_candidate_may_repeat() {
        let mut rng = rand::rng();
        let only = Uuid::new_v4();
        assert_eq!(rotate_choice(&[only], Some(only), &mut rng), Some(only));
        assert_eq!(rotate_choice(&[], None, &mut rng), None);
    }
}
