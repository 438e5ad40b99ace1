use crate::media::preset::RateControl;

pub const DEFAULT_DEVICE: &str = "/dev/dri/renderD128";

/// Device selection has to precede the input, so it is split from `apply`.
pub fn input_args(args: &mut Vec<String>, device: Option<&str>) {
    args.push("-vaapi_device".into());
    args.push(device.unwrap_or(DEFAULT_DEVICE).into());
}

pub fn upload_filter(scale: Option<(u32, u32)>) -> String {
    match scale {
        Some((w, h)) => format!("format=nv12,hwupload,scale_vaapi=w={w}:h={h}"),
        None => "format=nv12,hwupload".to_string(),
    }
}

pub fn apply(args: &mut Vec<String>, codec: &str, rate_control: RateControl) {
    args.push("-c:v".into());
    args.push(codec.into());

    match rate_control {
        RateControl::Crf { value } => {
            args.push("-qp".into());
            args.push(value.to_string());
        }
        RateControl::Bitrate { bps } => super::push_bitrate(args, bps),
    }
}
