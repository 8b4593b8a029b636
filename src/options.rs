//! URL option parsing and validation.
//!
//! Options are `key_value` path segments preceding the asset path, e.g.
//! `/livesim2/segtimeline_1/ato_7.0/testpic_2s/Manifest.mpd`. Parsing stops
//! at the first segment that is not a recognized `key_value` pair; the
//! remainder of the path is the asset path.

use regex::Regex;

use crate::error::{LivesimError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveMpdType {
    TimelineTime,
    TimelineNumber,
    SegmentNumber,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Ato {
    Finite(f64),
    Infinite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UtcMethod {
    Direct,
    Head,
    Ntp,
    Sntp,
    HttpXsdate,
    HttpIso,
    None_,
    /// Preserve whatever `UTCTiming` the VoD MPD already carries, rather
    /// than synthesizing one.
    Keep,
}

impl UtcMethod {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(UtcMethod::Direct),
            "head" => Ok(UtcMethod::Head),
            "ntp" => Ok(UtcMethod::Ntp),
            "sntp" => Ok(UtcMethod::Sntp),
            "httpxsdate" => Ok(UtcMethod::HttpXsdate),
            "httpiso" => Ok(UtcMethod::HttpIso),
            "none" => Ok(UtcMethod::None_),
            "keep" => Ok(UtcMethod::Keep),
            other => Err(LivesimError::BadConfig(format!("unknown utc method {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusCodeTrigger {
    pub cycle: u64,
    pub rsq: u64,
    pub code: u16,
    pub rep: String,
}

/// Parsed, validated URL options.
#[derive(Clone, Debug, Default)]
pub struct ResponseConfig {
    pub ast: Option<f64>,
    pub startrel: Option<f64>,
    pub stoprel: Option<f64>,
    pub stop: Option<f64>,
    pub timeoffset: Option<f64>,
    pub tsbd: Option<u64>,
    pub mup: Option<f64>,
    pub periods_per_hour: Option<u64>,
    pub continuous: bool,
    pub segtimeline: bool,
    pub segtimelinenr: bool,
    pub snr: Option<i64>,
    pub ato: Option<Ato>,
    pub ltgt_ms: Option<u64>,
    pub chunk_dur_s: Option<f64>,
    pub scte35_per_minute: Option<u64>,
    pub utc: Vec<UtcMethod>,
    pub timesubsstpp: Vec<String>,
    pub timesubswvtt: Vec<String>,
    pub timesubsdur_ms: Option<u64>,
    pub timesubsreg: Option<u8>,
    pub statuscode: Vec<StatusCodeTrigger>,
}

impl ResponseConfig {
    pub fn live_mpd_type(&self) -> LiveMpdType {
        if self.segtimeline {
            LiveMpdType::TimelineTime
        } else if self.segtimelinenr {
            LiveMpdType::TimelineNumber
        } else {
            LiveMpdType::SegmentNumber
        }
    }

    pub fn availability_time_complete(&self) -> bool {
        self.chunk_dur_s.is_none()
    }
}

/// Parse the `key_value` segments preceding the asset path. Returns the
/// config and the index of the first segment that is *not* a recognized
/// option (the start of the asset path).
pub fn parse_path_options(segments: &[&str]) -> Result<(ResponseConfig, usize)> {
    let mut cfg = ResponseConfig::default();
    let mut idx = 0;
    while idx < segments.len() {
        let seg = segments[idx];
        let Some((key, value)) = seg.split_once('_') else {
            break;
        };
        match key {
            "start" | "ast" => cfg.ast = Some(parse_f64(value)?),
            "startrel" => cfg.startrel = Some(parse_f64(value)?),
            "stoprel" => cfg.stoprel = Some(parse_f64(value)?),
            "stop" => cfg.stop = Some(parse_f64(value)?),
            "timeoffset" => cfg.timeoffset = Some(parse_f64(value)?),
            "tsbd" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| LivesimError::BadConfig(format!("bad tsbd value {value}")))?;
                if secs > 48 * 3600 {
                    return Err(LivesimError::BadConfig(
                        "tsbd must be within [0, 48h]".into(),
                    ));
                }
                cfg.tsbd = Some(secs);
            }
            "mup" => {
                let v = parse_f64(value)?;
                if v <= 0.0 {
                    return Err(LivesimError::BadConfig("mup must be > 0".into()));
                }
                cfg.mup = Some(v);
            }
            "periods" => {
                cfg.periods_per_hour = Some(
                    value
                        .parse()
                        .map_err(|_| LivesimError::BadConfig(format!("bad periods value {value}")))?,
                );
            }
            "continuous" => cfg.continuous = true,
            "segtimeline" => cfg.segtimeline = true,
            "segtimelinenr" => cfg.segtimelinenr = true,
            "snr" => {
                let v: i64 = value
                    .parse()
                    .map_err(|_| LivesimError::BadConfig(format!("bad snr value {value}")))?;
                cfg.snr = if v < 0 { None } else { Some(v) };
            }
            "ato" => {
                cfg.ato = Some(if value == "inf" {
                    Ato::Infinite
                } else {
                    Ato::Finite(parse_f64(value)?)
                });
            }
            "ltgt" => {
                cfg.ltgt_ms = Some(
                    value
                        .parse()
                        .map_err(|_| LivesimError::BadConfig(format!("bad ltgt value {value}")))?,
                );
            }
            "chunkdur" => cfg.chunk_dur_s = Some(parse_f64(value)?),
            "scte35" => {
                cfg.scte35_per_minute = Some(
                    value
                        .parse()
                        .map_err(|_| LivesimError::BadConfig(format!("bad scte35 value {value}")))?,
                );
            }
            "utc" => {
                cfg.utc = value
                    .split('-')
                    .map(UtcMethod::parse)
                    .collect::<Result<Vec<_>>>()?;
            }
            "timesubsstpp" => cfg.timesubsstpp = value.split(',').map(str::to_string).collect(),
            "timesubswvtt" => cfg.timesubswvtt = value.split(',').map(str::to_string).collect(),
            "timesubsdur" => {
                cfg.timesubsdur_ms = Some(
                    value
                        .parse()
                        .map_err(|_| LivesimError::BadConfig(format!("bad timesubsdur value {value}")))?,
                );
            }
            "timesubsreg" => {
                let v: u8 = value
                    .parse()
                    .map_err(|_| LivesimError::BadConfig(format!("bad timesubsreg value {value}")))?;
                if v > 1 {
                    return Err(LivesimError::BadConfig("timesubsreg must be 0 or 1".into()));
                }
                cfg.timesubsreg = Some(v);
            }
            "statuscode" => cfg.statuscode = parse_statuscode(value)?,
            _ => break,
        }
        idx += 1;
    }

    validate(&cfg)?;
    Ok((cfg, idx))
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse()
        .map_err(|_| LivesimError::BadConfig(format!("bad numeric option value {s}")))
}

fn parse_statuscode(value: &str) -> Result<Vec<StatusCodeTrigger>> {
    // Accepts `[{cycle:30,rsq:0,code:404,rep:V300},...]` — the bracketed,
    // comma-separated list of unquoted-key objects used throughout the URL
    // option grammar.
    let entry_re = Regex::new(
        r"\{\s*cycle\s*:\s*(\d+)\s*,\s*rsq\s*:\s*(\d+)\s*,\s*code\s*:\s*(\d+)\s*,\s*rep\s*:\s*([A-Za-z0-9_.-]+)\s*\}",
    )
    .expect("static regex is valid");
    let mut out = Vec::new();
    for caps in entry_re.captures_iter(value) {
        let code: u16 = caps[3]
            .parse()
            .map_err(|_| LivesimError::BadConfig("bad statuscode code".into()))?;
        if !(400..=599).contains(&code) {
            return Err(LivesimError::BadConfig(
                "statuscode code must be in [400, 599]".into(),
            ));
        }
        out.push(StatusCodeTrigger {
            cycle: caps[1].parse().unwrap(),
            rsq: caps[2].parse().unwrap(),
            code,
            rep: caps[4].to_string(),
        });
    }
    if out.is_empty() {
        return Err(LivesimError::BadConfig(format!(
            "malformed statuscode option: {value}"
        )));
    }
    Ok(out)
}

fn validate(cfg: &ResponseConfig) -> Result<()> {
    if cfg.segtimeline && cfg.segtimelinenr {
        return Err(LivesimError::BadConfig(
            "segtimeline and segtimelinenr are mutually exclusive".into(),
        ));
    }
    if cfg.continuous && cfg.periods_per_hour.is_none() {
        return Err(LivesimError::BadConfig(
            "continuous requires periods".into(),
        ));
    }
    if matches!(cfg.ato, Some(Ato::Infinite)) && cfg.live_mpd_type() != LiveMpdType::SegmentNumber {
        return Err(LivesimError::BadConfig(
            "infinite ato is only valid for Number-addressed MPDs".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_until_first_unknown_segment() {
        let segs = ["segtimeline_1", "ato_7.0", "testpic_2s", "Manifest.mpd"];
        let (cfg, idx) = parse_path_options(&segs).unwrap();
        assert!(cfg.segtimeline);
        assert_eq!(cfg.ato, Some(Ato::Finite(7.0)));
        assert_eq!(idx, 2);
    }

    #[test]
    fn segtimeline_and_segtimelinenr_conflict() {
        let segs = ["segtimeline_1", "segtimelinenr_1", "a"];
        assert!(parse_path_options(&segs).is_err());
    }

    #[test]
    fn continuous_requires_periods() {
        let segs = ["continuous_1", "a"];
        assert!(parse_path_options(&segs).is_err());
    }

    #[test]
    fn infinite_ato_rejected_for_timeline_mode() {
        let segs = ["segtimeline_1", "ato_inf", "a"];
        assert!(parse_path_options(&segs).is_err());
    }

    #[test]
    fn infinite_ato_accepted_for_number_mode() {
        let segs = ["ato_inf", "a"];
        let (cfg, _) = parse_path_options(&segs).unwrap();
        assert_eq!(cfg.ato, Some(Ato::Infinite));
    }

    #[test]
    fn tsbd_out_of_range_rejected() {
        let segs = ["tsbd_999999", "a"];
        assert!(parse_path_options(&segs).is_err());
    }

    #[test]
    fn statuscode_parses_trigger_list() {
        let segs = ["statuscode_[{cycle:30,rsq:0,code:404,rep:V300}]", "a"];
        let (cfg, idx) = parse_path_options(&segs).unwrap();
        assert_eq!(cfg.statuscode.len(), 1);
        assert_eq!(cfg.statuscode[0].code, 404);
        assert_eq!(cfg.statuscode[0].rep, "V300");
        assert_eq!(idx, 1);
    }

    #[test]
    fn negative_snr_is_omitted() {
        let segs = ["snr_-5", "a"];
        let (cfg, _) = parse_path_options(&segs).unwrap();
        assert_eq!(cfg.snr, None);
    }
}
