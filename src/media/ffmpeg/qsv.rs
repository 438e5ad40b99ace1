use crate::media::preset::RateControl;

pub fn apply(args: &mut Vec<String>, codec: &str, rate_control: RateControl) {
    args.push("-c:v".into());
    args.push(codec.into());

    match rate_control {
        RateControl::Crf { value } => {
            args.push("-global_quality".into());
            args.push(value.to_string());
            args.push("-look_ahead".into());
            args.push("1".into());
        }
        RateControl::Bitrate { bps } => super::push_bitrate(args, bps),
    }
}
