use crate::media::encoder::CodecFamily;
use crate::media::preset::RateControl;

pub fn apply(args: &mut Vec<String>, family: CodecFamily, rate_control: RateControl) {
    args.push("-c:v".into());
    args.push(family.software_encoder().into());

    match family {
        CodecFamily::H264 | CodecFamily::Hevc => {
            args.push("-preset".into());
            args.push("medium".into());
        }
        CodecFamily::Av1 => {
            args.push("-preset".into());
            args.push("8".into());
        }
        CodecFamily::Vp9 => {
            args.push("-row-mt".into());
            args.push("1".into());
        }
    }

    match rate_control {
        RateControl::Crf { value } => {
            args.push("-crf".into());
            args.push(value.to_string());
            if family == CodecFamily::Vp9 {
                // libvpx only honours crf in constrained-quality mode with b:v 0
                args.push("-b:v".into());
                args.push("0".into());
            }
        }
        RateControl::Bitrate { bps } => super::push_bitrate(args, bps),
    }

    if family == CodecFamily::Hevc {
        args.push("-tag:v".into());
        args.push("hvc1".into());
    }
}
