use crate::media::preset::RateControl;

pub fn apply(args: &mut Vec<String>, codec: &str, rate_control: RateControl) {
    args.push("-c:v".into());
    args.push(codec.into());

    match rate_control {
        RateControl::Crf { value } => {
            // VideoToolbox quality runs 1..100, higher is better
            let quality = 100u32.saturating_sub(u32::from(value) * 2).clamp(1, 100);
            args.push("-b:v".into());
            args.push("0".into());
            args.push("-q:v".into());
            args.push(quality.to_string());
        }
        RateControl::Bitrate { bps } => super::push_bitrate(args, bps),
    }

    if codec.starts_with("hevc") {
        args.push("-tag:v".into());
        args.push("hvc1".into());
    }
}
