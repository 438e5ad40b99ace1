use crate::media::preset::RateControl;

pub fn apply(args: &mut Vec<String>, codec: &str, rate_control: RateControl) {
    args.push("-c:v".into());
    args.push(codec.into());
    args.push("-preset".into());
    args.push("p4".into());

    match rate_control {
        RateControl::Crf { value } => {
            args.push("-rc".into());
            args.push("vbr".into());
            args.push("-cq".into());
            args.push(value.to_string());
        }
        RateControl::Bitrate { bps } => super::push_bitrate(args, bps),
    }
}
