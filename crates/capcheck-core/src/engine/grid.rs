use crate::config::CampaignConfig;
use crate::model::Trial;

/// `min, min+delta, ...` up to and including `max`.
///
/// A zero delta is only meaningful for a single-point range and yields `[min]`.
pub fn progression(min: u32, max: u32, delta: u32) -> Vec<u32> {
    if min > max {
        return Vec::new();
    }
    if delta == 0 {
        return vec![min];
    }
    let count = (max - min) / delta + 1;
    (0..count).map(|i| min + i * delta).collect()
}

/// Trials in execution order: outer loop over load, inner loop over cap.
pub fn expand(campaign: &CampaignConfig) -> Vec<Trial> {
    let loads = progression(campaign.min_load, campaign.max_load, campaign.load_delta);
    let caps = progression(campaign.cap_min, campaign.cap_max, campaign.cap_delta);

    let mut trials = Vec::with_capacity(loads.len() * caps.len());
    for &load_percent in &loads {
        for &cap_watts in &caps {
            trials.push(Trial {
                index: trials.len(),
                load_percent,
                cap_watts,
            });
        }
    }
    trials
}
