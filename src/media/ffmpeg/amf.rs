use crate::media::preset::RateControl;

pub fn apply(args: &mut Vec<String>, codec: &str, rate_control: RateControl) {
    args.push("-c:v".into());
    args.push(codec.into());

    match rate_control {
        RateControl::Crf { value } => {
            args.push("-rc".into());
            args.push("cqp".into());
            args.push("-qp_i".into());
            args.push(value.to_string());
            args.push("-qp_p".into());
            args.push(value.to_string());
        }
        RateControl::Bitrate { bps } => {
            args.push("-rc".into());
            args.push("vbr_peak".into());
            super::push_bitrate(args, bps);
        }
    }
}
