use std::path::PathBuf;

use meshsplat::config::{ConversionSettings, Resolution};
use meshsplat::conversion::convert;
use meshsplat::export::{export_ply, read_ply_vertex_count, ExportFormat};
use meshsplat::gaussian::AttributeBuffer;
use meshsplat::mesh::Mesh;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("meshsplat_{}_{}", std::process::id(), name))
}

#[test]
fn test_export_every_format_writes_valid_count() {
    let settings = ConversionSettings::new().with_resolution(Resolution::new(64).unwrap());
    let (buffer, _) = convert(&Mesh::unit_cube(), &settings);
    for format in ExportFormat::ALL {
        let path = temp_path(&format!("cube_{}.ply", format.as_index()));
        let written = export_ply(&buffer, &path, format).unwrap();
        assert_eq!(written, buffer.valid_count());
        assert_eq!(read_ply_vertex_count(&path).unwrap(), written);

        let bytes = std::fs::read(&path).unwrap();
        let header = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).into_owned();
        assert!(header.starts_with("ply\nformat binary_little_endian 1.0\n"));
        let header_len = header.find("end_header\n").unwrap() + "end_header\n".len();
        assert_eq!(bytes.len() - header_len, written * format.stride());
        let _ = std::fs::remove_file(&path);
    }
}

#[test]
fn test_standard_header_names_3dgs_properties() {
    let settings = ConversionSettings::new().with_resolution(Resolution::new(64).unwrap());
    let (buffer, _) = convert(&Mesh::unit_cube(), &settings);
    let path = temp_path("props.ply");
    export_ply(&buffer, &path, ExportFormat::Standard).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    let text = String::from_utf8_lossy(&bytes);
    for prop in ["f_dc_0", "opacity", "scale_0", "rot_0"] {
        assert!(text.contains(&format!("property float {}\n", prop)), "missing {}", prop);
    }
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_empty_buffer_writes_header_only() {
    let buffer = AttributeBuffer::new(Resolution::new(64).unwrap());
    let path = temp_path("empty.ply");
    assert_eq!(export_ply(&buffer, &path, ExportFormat::Standard).unwrap(), 0);
    assert_eq!(read_ply_vertex_count(&path).unwrap(), 0);
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.ends_with(b"end_header\n"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_unwritable_destination_fails_cleanly() {
    let settings = ConversionSettings::new().with_resolution(Resolution::new(64).unwrap());
    let (buffer, _) = convert(&Mesh::unit_cube(), &settings);
    let path = temp_path("no_such_dir").join("out.ply");
    assert!(export_ply(&buffer, &path, ExportFormat::Standard).is_err());
    assert!(!path.exists());
}
