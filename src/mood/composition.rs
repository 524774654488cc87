//! Component G — Mood Composition Engine.
//!
//! Combines plot-derived mood `P` (weight 0.7) and user-impact mood `U`
//! (weight 0.3) into a new clamped mood, using fixed weights and a fixed
//! "amplify when already agitated" rule rather than a learned inertia
//! curve.

use super::{derive_tag, MoodVector};

const W_PLOT: f32 = 0.7;
const W_USER: f32 = 0.3;

/// Markers the analyzer emits when a sub-analysis could not produce a
/// meaningful signal; excluded from the tag union.
const IGNORED_TAG_MARKERS: &[&str] = &["no impact", "analysis failed", "未知", "无"];

/// Output of the dedicated user-impact sub-analysis: a first-person,
/// in-character read of "did what the user just said affect me, how, and
/// how strongly."
#[derive(Debug, Clone)]
pub struct UserImpact {
    pub impact_valence: f32,
    pub impact_arousal: f32,
    pub impact_tags: Vec<String>,
    pub impact_intensity: i32,
    pub impact_description: String,
}

/// Composes a new mood from current `m`, plot-derived `p`, and optional
/// user impact `u`. When `u` is `None` (the sub-analysis failed to produce
/// parseable output), `m` is returned unchanged rather than applying the
/// plot delta on its own — a half-composed mood would be just as much of
/// a fabrication as a zero-impact default.
pub fn compose(m: &MoodVector, p: &MoodVector, u: Option<&UserImpact>) -> MoodVector {
    let Some(u) = u else {
        return m.clone().normalized();
    };

    // Amplification rule: agitated characters are more reactive.
    let amplify = if m.intensity >= 7 {
        1.2
    } else if m.intensity <= 3 {
        0.7
    } else {
        1.0
    };

    let delta_plot_valence = p.valence - m.valence;
    let delta_user_valence = u.impact_valence;
    let new_valence =
        (m.valence + W_PLOT * amplify * delta_plot_valence + W_USER * amplify * delta_user_valence)
            .clamp(-1.0, 1.0);

    let delta_plot_arousal = p.arousal - m.arousal;
    let delta_user_arousal = u.impact_arousal;
    let new_arousal =
        (m.arousal + W_PLOT * amplify * delta_plot_arousal + W_USER * amplify * delta_user_arousal)
            .clamp(0.0, 1.0);

    let delta_plot_intensity = p.intensity as f32 - m.intensity as f32;
    let delta_user_intensity = u.impact_intensity as f32;
    let new_intensity = ((m.intensity as f32
        + W_PLOT * amplify * delta_plot_intensity
        + W_USER * amplify * delta_user_intensity)
        .round() as i32)
        .clamp(1, 10) as u8;

    let mut tags: Vec<String> = p.tags.clone();
    for tag in &u.impact_tags {
        let lowered = tag.to_lowercase();
        if IGNORED_TAG_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            continue;
        }
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    if tags.is_empty() {
        tags.push(derive_tag(new_valence, new_arousal).to_string());
    }
    tags.truncate(3);

    let description = format!("{} {}", p.description, u.impact_description).trim().to_string();

    MoodVector {
        valence: new_valence,
        arousal: new_arousal,
        intensity: new_intensity,
        tags,
        description,
    }
    .normalized()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mood(valence: f32, arousal: f32, intensity: u8, tags: &[&str]) -> MoodVector {
        MoodVector {
            valence,
            arousal,
            intensity,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            description: String::new(),
        }
    }

    fn zero_impact() -> UserImpact {
        UserImpact { impact_valence: 0.0, impact_arousal: 0.0, impact_tags: vec![], impact_intensity: 0, impact_description: String::new() }
    }

    #[test]
    fn no_plot_or_user_delta_leaves_mood_unchanged() {
        let m = mood(0.1, 0.4, 4, &["focused"]);
        let p = m.clone();
        let composed = compose(&m, &p, Some(&zero_impact()));
        assert!((composed.valence - m.valence).abs() < 0.01);
        assert!((composed.arousal - m.arousal).abs() < 0.01);
        assert_eq!(composed.intensity, m.intensity);
    }

    #[test]
    fn clamps_instead_of_wrapping() {
        let m = mood(0.9, 0.9, 8, &["excited"]);
        let p = mood(1.0, 1.0, 10, &["excited"]);
        let u = UserImpact {
            impact_valence: 1.0,
            impact_arousal: 1.0,
            impact_tags: vec!["thrilled".to_string()],
            impact_intensity: 10,
            impact_description: "thrilled".to_string(),
        };
        let composed = compose(&m, &p, Some(&u));
        assert!(composed.valence <= 1.0 && composed.valence >= -1.0);
        assert!(composed.arousal <= 1.0 && composed.arousal >= 0.0);
        assert!(composed.intensity >= 1 && composed.intensity <= 10);
    }

    #[test]
    fn amplifies_when_intensity_at_or_above_seven() {
        let m_high = mood(0.0, 0.0, 7, &["calm"]);
        let m_mid = mood(0.0, 0.0, 5, &["calm"]);
        let p = mood(0.5, 0.5, 7, &["pleased"]);

        let high = compose(&m_high, &p, Some(&zero_impact()));
        let mid = compose(&m_mid, &p, Some(&zero_impact()));

        assert!(
            high.valence > mid.valence,
            "intensity=7 should amplify the plot delta by 1.2x relative to intensity=5's 1.0x"
        );
    }

    #[test]
    fn dampens_when_intensity_at_or_below_three() {
        let m_low = mood(0.0, 0.0, 3, &["calm"]);
        let m_mid = mood(0.0, 0.0, 5, &["calm"]);
        let p = mood(0.5, 0.5, 3, &["pleased"]);

        let low = compose(&m_low, &p, Some(&zero_impact()));
        let mid = compose(&m_mid, &p, Some(&zero_impact()));

        assert!(
            low.valence < mid.valence,
            "intensity=3 should dampen the plot delta by 0.7x relative to intensity=5's 1.0x"
        );
    }

    #[test]
    fn missing_user_impact_returns_mood_unchanged() {
        let m = mood(0.0, 0.0, 5, &["calm"]);
        let p = mood(0.5, 0.5, 5, &["pleased"]);
        let composed = compose(&m, &p, None);
        assert_eq!(composed.valence, m.valence);
        assert_eq!(composed.arousal, m.arousal);
        assert_eq!(composed.intensity, m.intensity);
    }

    #[test]
    fn ignored_tag_markers_are_excluded_from_union() {
        let m = mood(0.0, 0.0, 5, &["calm"]);
        let p = mood(0.2, 0.2, 5, &["pleased"]);
        let u = UserImpact {
            impact_valence: 0.1,
            impact_arousal: 0.1,
            impact_tags: vec!["analysis failed".to_string(), "curious".to_string()],
            impact_intensity: 5,
            impact_description: String::new(),
        };
        let composed = compose(&m, &p, Some(&u));
        assert!(!composed.tags.iter().any(|t| t == "analysis failed"));
        assert!(composed.tags.contains(&"curious".to_string()));
    }

    #[test]
    fn tags_capped_at_three() {
        let m = mood(0.0, 0.0, 5, &["calm"]);
        let p = mood(0.2, 0.2, 5, &["a", "b", "c", "d"]);
        let composed = compose(&m, &p, Some(&zero_impact()));
        assert!(composed.tags.len() <= 3);
    }
}
