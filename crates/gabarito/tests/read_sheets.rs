use gabarito::{read_image_data, read_image_path, ErrorKind, Reader, Reading, UNKNOWN_ID};
use gabarito_core::PixelBuffer;
use gabarito_sheet::synth::{render_sheet, SheetMarks, SynthParams};
use gabarito_sheet::SheetTemplate;
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;

const ANSWERS: &str = "abcdeedcbaab-XcdeabX";

fn encode(buf: &PixelBuffer, format: ImageFormat) -> Vec<u8> {
    let img = GrayImage::from_raw(buf.width() as u32, buf.height() as u32, buf.to_packed())
        .expect("buffer fits");
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, format)
        .expect("encode");
    out.into_inner()
}

fn sheet_png(marks: &SheetMarks, params: &SynthParams) -> Vec<u8> {
    let template = SheetTemplate::standard();
    let buf = render_sheet(&template, marks, params).expect("render");
    encode(&buf, ImageFormat::Png)
}

fn standard_marks() -> SheetMarks {
    SheetMarks::for_values(&SheetTemplate::standard(), 372, 1045, ANSWERS)
}

fn expect_success(reading: &Reading) -> (&str, i32, i32) {
    match reading {
        Reading::Success {
            id_prova,
            id_participante,
            leitura,
        } => (leitura.as_str(), *id_prova, *id_participante),
        Reading::Failure { kind } => panic!("expected success, got {kind:?}"),
    }
}

#[test]
fn reads_well_formed_sheet() {
    let _ = env_logger::builder().is_test(true).try_init();
    let png = sheet_png(&standard_marks(), &SynthParams::default());

    let reading = read_image_data("png", &png);
    let (leitura, prova, participante) = expect_success(&reading);
    assert_eq!(leitura, ANSWERS);
    assert_eq!(leitura.chars().count(), 20);
    assert_eq!(prova, 372);
    assert_eq!(participante, 1045);
    assert_eq!(reading.to_record().erro, 0);
}

#[test]
fn placeholders_for_blank_and_double_rows() {
    let png = sheet_png(&standard_marks(), &SynthParams::default());
    let reading = read_image_data("PNG", &png);
    let (leitura, ..) = expect_success(&reading);
    assert_eq!(leitura.chars().nth(12), Some('-'));
    assert_eq!(leitura.chars().nth(13), Some('X'));
    assert_eq!(leitura.chars().nth(19), Some('X'));
}

#[test]
fn double_marked_id_column_is_unknown() {
    let mut marks = standard_marks();
    marks.exam_id[1] = vec![7, 1];
    marks.participant_id[0].clear();
    let reading = read_image_data("png", &sheet_png(&marks, &SynthParams::default()));
    let (leitura, prova, participante) = expect_success(&reading);
    assert_eq!(prova, UNKNOWN_ID);
    assert_eq!(participante, UNKNOWN_ID);
    assert_eq!(leitura, ANSWERS);
}

#[test]
fn small_rotations_read_the_same() {
    let straight = read_image_data("png", &sheet_png(&standard_marks(), &SynthParams::default()));
    for deg in [-5.0, -2.5, 3.0, 5.0] {
        let params = SynthParams {
            rotation_deg: deg,
            noise: 8,
            ..SynthParams::default()
        };
        let rotated = read_image_data("png", &sheet_png(&standard_marks(), &params));
        assert_eq!(rotated, straight, "rotation {deg}°");
    }
}

#[test]
fn upside_down_sheet_reads_like_upright() {
    let upright = read_image_data("png", &sheet_png(&standard_marks(), &SynthParams::default()));
    for deg in [180.0, 177.0, 90.0] {
        let params = SynthParams {
            rotation_deg: deg,
            ..SynthParams::default()
        };
        let turned = read_image_data("png", &sheet_png(&standard_marks(), &params));
        assert_eq!(turned, upright, "rotation {deg}°");
    }
}

#[test]
fn sheet_without_orientation_mark_is_not_detected() {
    let params = SynthParams {
        rotation_deg: 180.0,
        omit_orientation_mark: true,
        ..SynthParams::default()
    };
    let reading = read_image_data("png", &sheet_png(&standard_marks(), &params));
    assert_eq!(reading.kind(), ErrorKind::SheetNotDetected);
    assert!(reading.leitura().is_none());
}

#[test]
fn mild_perspective_is_tolerated() {
    let params = SynthParams {
        perspective: 0.06,
        rotation_deg: 1.5,
        ..SynthParams::default()
    };
    let reading = read_image_data("png", &sheet_png(&standard_marks(), &params));
    let (leitura, prova, _) = expect_success(&reading);
    assert_eq!(leitura, ANSWERS);
    assert_eq!(prova, 372);
}

#[test]
fn same_bytes_give_same_reading() {
    let png = sheet_png(
        &standard_marks(),
        &SynthParams {
            noise: 15,
            rotation_deg: 2.0,
            ..SynthParams::default()
        },
    );
    assert_eq!(read_image_data("png", &png), read_image_data("png", &png));
}

#[test]
fn concurrent_reads_share_one_reader() {
    let reader = Reader::standard();
    let png = sheet_png(&standard_marks(), &SynthParams::default());
    let (a, b) = std::thread::scope(|scope| {
        let a = scope.spawn(|| reader.read_bytes("png", &png));
        let b = scope.spawn(|| reader.read_bytes("png", &png));
        (a.join().expect("thread a"), b.join().expect("thread b"))
    });
    assert_eq!(a, b);
    assert_eq!(expect_success(&a).1, 372);
}

#[test]
fn jpeg_input_is_supported() {
    let template = SheetTemplate::standard();
    let buf = render_sheet(&template, &standard_marks(), &SynthParams::default()).expect("render");
    let jpg = encode(&buf, ImageFormat::Jpeg);
    let reading = read_image_data(".jpg", &jpg);
    let (leitura, prova, participante) = expect_success(&reading);
    assert_eq!((leitura, prova, participante), (ANSWERS, 372, 1045));
}

#[test]
fn reads_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sheet.png");
    std::fs::write(&path, sheet_png(&standard_marks(), &SynthParams::default())).expect("write");

    let reading = read_image_path(&path);
    assert_eq!(expect_success(&reading).1, 372);
}

#[test]
fn missing_file_is_source_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let reading = read_image_path(dir.path().join("nope.png"));
    assert_eq!(reading, Reading::failure(ErrorKind::SourceUnavailable));
    let record = reading.to_record();
    assert_eq!(record.erro, 1);
    assert_eq!((record.id_prova, record.id_participante), (-1, -1));
    assert!(record.leitura.is_none());
}

#[test]
fn container_errors_map_to_codes() {
    let png = sheet_png(&standard_marks(), &SynthParams::default());
    assert_eq!(read_image_data("png", &[]).code(), 1);
    assert_eq!(read_image_data("tiff-ish", &png).code(), 2);
    assert_eq!(read_image_data("png", &png[..png.len() / 3]).code(), 3);
}

#[test]
fn blank_page_is_not_detected() {
    let blank = PixelBuffer::filled(600, 840, 248).expect("buffer");
    let reading = read_image_data("png", &encode(&blank, ImageFormat::Png));
    assert_eq!(reading.kind(), ErrorKind::SheetNotDetected);
}

#[test]
fn missing_corner_is_not_detected() {
    let params = SynthParams {
        omit_fiducial: Some(0),
        ..SynthParams::default()
    };
    let reading = read_image_data("png", &sheet_png(&standard_marks(), &params));
    assert_eq!(reading.code(), 4);
}

#[test]
fn squashed_sheet_is_distorted() {
    let params = SynthParams {
        scale_y: 0.55,
        ..SynthParams::default()
    };
    let reading = read_image_data("png", &sheet_png(&standard_marks(), &params));
    assert_eq!(reading.kind(), ErrorKind::SheetDistorted);
    assert!(reading.leitura().is_none());
}

#[test]
fn custom_template_through_reader() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("layout.json");

    let mut template = SheetTemplate::standard();
    template.name = "ten-questions".to_string();
    template.answers.truncate(10);
    template.write_json(&path).expect("write template");

    let loaded = SheetTemplate::load_json(&path).expect("load template");
    let reader = Reader::new(loaded).expect("valid template");

    let marks = SheetMarks::for_values(reader.template(), 5, 77, "eeeee-aaaa");
    let buf = render_sheet(reader.template(), &marks, &SynthParams::default()).expect("render");
    let reading = reader.read_image(&buf.view());
    let (leitura, prova, participante) = expect_success(&reading);
    assert_eq!((leitura, prova, participante), ("eeeee-aaaa", 5, 77));
}
