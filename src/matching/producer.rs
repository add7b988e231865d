// src/matching/producer.rs

use log::{debug, trace};

use crate::config;
use crate::models::{TeamDirectory, TeamMemberId};
use crate::normalize::name_tokens;

/// Outcome of resolving a sub-producer code or raw name against the
/// team directory. Absence of a match degrades gracefully to `None`;
/// this function never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerMatch {
    pub team_member_id: Option<TeamMemberId>,
    pub matched: bool,
}

impl ProducerMatch {
    fn unmatched() -> Self {
        ProducerMatch {
            team_member_id: None,
            matched: false,
        }
    }

    fn hit(id: TeamMemberId) -> Self {
        ProducerMatch {
            team_member_id: Some(id),
            matched: true,
        }
    }
}

/// Resolves a sub-producer to a team member.
///
/// The code path wins immediately on a case-insensitive exact hit
/// against the directory's prebuilt index. Only when no code resolves is
/// the raw name tried with token-overlap fuzzy matching: a member is
/// accepted when at least half the input tokens agree AND at least two
/// tokens agree, so a single shared surname is never enough. Equal-score
/// ties resolve to the lexically smallest member id to keep the result
/// independent of directory iteration order.
pub fn match_producer(
    raw_code: Option<&str>,
    raw_name: Option<&str>,
    directory: &TeamDirectory,
) -> ProducerMatch {
    if let Some(code) = raw_code {
        if !code.trim().is_empty() {
            if let Some(id) = directory.by_code(code) {
                trace!("Producer code {:?} resolved exactly to {:?}", code, id);
                return ProducerMatch::hit(id.clone());
            }
            debug!("Producer code {:?} not found in directory, trying name", code);
        }
    }

    if let Some(name) = raw_name {
        if !name.trim().is_empty() {
            return match_by_name(name, directory);
        }
    }

    ProducerMatch::unmatched()
}

fn match_by_name(raw_name: &str, directory: &TeamDirectory) -> ProducerMatch {
    let input_tokens = name_tokens(raw_name);
    if input_tokens.is_empty() {
        return ProducerMatch::unmatched();
    }

    let mut best: Option<(f64, usize, &TeamMemberId)> = None;

    for member in directory.members() {
        let member_tokens = name_tokens(&member.name);
        if member_tokens.is_empty() {
            continue;
        }

        // A token agrees when either side is a substring of the other,
        // which tolerates truncated and nicknamed tokens ("Jon"/"Jonathan").
        let matched_tokens = input_tokens
            .iter()
            .filter(|input| {
                member_tokens
                    .iter()
                    .any(|m| input.contains(m.as_str()) || m.contains(input.as_str()))
            })
            .count();

        let score = matched_tokens as f64 / input_tokens.len() as f64;

        if score < config::FUZZY_MIN_TOKEN_SCORE
            || matched_tokens < config::FUZZY_MIN_MATCHED_TOKENS
        {
            continue;
        }

        trace!(
            "Fuzzy producer candidate {:?}: {}/{} tokens, score {:.2}",
            member.name,
            matched_tokens,
            input_tokens.len(),
            score
        );

        let replace = match &best {
            None => true,
            Some((best_score, _, best_id)) => {
                score > *best_score || (score == *best_score && member.id < **best_id)
            }
        };
        if replace {
            best = Some((score, matched_tokens, &member.id));
        }
    }

    match best {
        Some((score, matched_tokens, id)) => {
            debug!(
                "Fuzzy producer match for {:?}: {:?} ({} tokens, score {:.2})",
                raw_name, id, matched_tokens, score
            );
            ProducerMatch::hit(id.clone())
        }
        None => ProducerMatch::unmatched(),
    }
}
