//! Asset containers: where plaintext arrays come from and where ciphertext
//! and its metadata go back to.
//!
//! Metadata is consumed by `retrieve_metadata`; a container hands it out at
//! most once per embed.

use std::fs;
use std::path::Path;

use crate::array::{MeshArray, NdArray, Plaintext};
use crate::asset::AssetError;
use crate::system::AadData;

/// Marker that introduces the metadata comment line in OFF files.
pub const OFF_METADATA_MARKER: &str = "# layercrypt-aad ";

pub trait AssetContainer {
    /// Arrays the cipher works on, in a stable order.
    fn plaintext(&self) -> Result<Plaintext, AssetError>;

    /// Replaces the container's arrays with `plaintext`, which must have the
    /// layout returned by `plaintext`.
    fn insert(&mut self, plaintext: Plaintext) -> Result<(), AssetError>;

    fn embed_metadata(&mut self, aad: &AadData) -> Result<(), AssetError>;

    fn retrieve_metadata(&mut self) -> Result<AadData, AssetError>;

    fn has_metadata(&self) -> bool;
}

/// Container backed by an in-memory bundle. Metadata is kept in its JSON
/// form so it goes through the same encoding as file containers.
#[derive(Clone, Debug, Default)]
pub struct MemoryContainer {
    plaintext: Plaintext,
    metadata: Option<String>,
}

impl MemoryContainer {
    pub fn new(plaintext: Plaintext) -> Self {
        Self {
            plaintext,
            metadata: None,
        }
    }

    pub fn bundle(&self) -> &Plaintext {
        &self.plaintext
    }
}

impl AssetContainer for MemoryContainer {
    fn plaintext(&self) -> Result<Plaintext, AssetError> {
        Ok(self.plaintext.clone())
    }

    fn insert(&mut self, plaintext: Plaintext) -> Result<(), AssetError> {
        if plaintext.meshes.len() != self.plaintext.meshes.len()
            || plaintext.images.len() != self.plaintext.images.len()
        {
            return Err(AssetError::Layout("array count changed"));
        }
        self.plaintext = plaintext;
        Ok(())
    }

    fn embed_metadata(&mut self, aad: &AadData) -> Result<(), AssetError> {
        self.metadata = Some(serde_json::to_string(aad)?);
        Ok(())
    }

    fn retrieve_metadata(&mut self) -> Result<AadData, AssetError> {
        let aad = decode_metadata(self.metadata.as_deref())?;
        self.metadata = None;
        Ok(aad)
    }

    fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }
}

/// OFF / COFF mesh file.
///
/// Vertex positions (`n x 3`) and optional per-vertex colors (`n x k`) are
/// the plaintext; face records are carried through verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct OffContainer {
    colored: bool,
    vertices: NdArray<f32>,
    colors: Option<NdArray<f32>>,
    faces: Vec<String>,
    edge_count: usize,
    comments: Vec<String>,
    metadata: Option<String>,
}

fn parse_error(line: usize, reason: impl Into<String>) -> AssetError {
    AssetError::Parse {
        line,
        reason: reason.into(),
    }
}

/// Decodes stored metadata without consuming it, so a corrupt entry stays
/// in the container.
fn decode_metadata(json: Option<&str>) -> Result<AadData, AssetError> {
    let json = json.ok_or(AssetError::MissingMetadata)?;
    Ok(serde_json::from_str(json)?)
}

/// Non-finite values are written as `0x`-prefixed bit patterns; ciphertext
/// can turn an infinity into a NaN whose payload must survive.
fn format_value(value: f32) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        format!("0x{:08x}", value.to_bits())
    }
}

fn parse_value(token: &str) -> Option<f32> {
    match token.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok().map(f32::from_bits),
        None => token.parse().ok(),
    }
}

fn parse_count(token: Option<&str>, line: usize, what: &str) -> Result<usize, AssetError> {
    token
        .ok_or_else(|| parse_error(line, format!("missing {what} count")))?
        .parse()
        .map_err(|_| parse_error(line, format!("invalid {what} count")))
}

impl OffContainer {
    pub fn new(
        vertices: NdArray<f32>,
        colors: Option<NdArray<f32>>,
        faces: Vec<String>,
    ) -> Result<Self, AssetError> {
        if vertices.ndim() != 2 || vertices.shape()[1] != 3 {
            return Err(AssetError::Layout("vertices must be n x 3"));
        }
        if let Some(colors) = &colors {
            if colors.ndim() != 2 || colors.shape()[0] != vertices.shape()[0] {
                return Err(AssetError::Layout("colors must have one row per vertex"));
            }
        }
        Ok(Self {
            colored: colors.is_some(),
            vertices,
            colors,
            faces,
            edge_count: 0,
            comments: Vec::new(),
            metadata: None,
        })
    }

    pub fn vertices(&self) -> &NdArray<f32> {
        &self.vertices
    }

    pub fn colors(&self) -> Option<&NdArray<f32>> {
        self.colors.as_ref()
    }

    pub fn faces(&self) -> &[String] {
        &self.faces
    }

    pub fn parse(text: &str) -> Result<Self, AssetError> {
        let mut comments = Vec::new();
        let mut metadata = None;
        let body: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .filter_map(|(idx, raw)| {
                let line = raw.trim();
                if let Some(json) = line.strip_prefix(OFF_METADATA_MARKER.trim_end()) {
                    metadata = Some(json.trim().to_string());
                    None
                } else if line.starts_with('#') {
                    comments.push(line.to_string());
                    None
                } else if line.is_empty() {
                    None
                } else {
                    Some((idx + 1, line))
                }
            })
            .collect();
        let mut lines = body.into_iter();

        let (line_no, header) = lines.next().ok_or_else(|| parse_error(0, "empty file"))?;
        let mut tokens = header.split_whitespace();
        let colored = match tokens.next() {
            Some("OFF") => false,
            Some("COFF") => true,
            _ => return Err(parse_error(line_no, "expected OFF or COFF header")),
        };
        let mut counts: Vec<&str> = tokens.collect();
        let mut counts_line = line_no;
        if counts.is_empty() {
            let (next_no, next) = lines
                .next()
                .ok_or_else(|| parse_error(line_no, "missing element counts"))?;
            counts = next.split_whitespace().collect();
            counts_line = next_no;
        }
        let mut counts = counts.into_iter();
        let vertex_count = parse_count(counts.next(), counts_line, "vertex")?;
        let face_count = parse_count(counts.next(), counts_line, "face")?;
        let edge_count = parse_count(counts.next().or(Some("0")), counts_line, "edge")?;

        let remaining = lines.len();
        let position_count = vertex_count
            .checked_mul(3)
            .ok_or_else(|| parse_error(counts_line, "vertex count too large"))?;
        if vertex_count.saturating_add(face_count) > remaining {
            return Err(parse_error(counts_line, "fewer elements than declared"));
        }

        let mut positions = Vec::with_capacity(position_count);
        let mut color_values = Vec::new();
        let mut color_width = None;
        for _ in 0..vertex_count {
            let (no, line) = lines
                .next()
                .ok_or_else(|| parse_error(counts_line, "fewer vertices than declared"))?;
            let values = line
                .split_whitespace()
                .map(parse_value)
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| parse_error(no, "invalid vertex value"))?;
            if values.len() < 3 {
                return Err(parse_error(no, "vertex needs three coordinates"));
            }
            let width = values.len() - 3;
            match color_width {
                None => color_width = Some(width),
                Some(expected) if expected != width => {
                    return Err(parse_error(no, "inconsistent vertex attribute count"));
                }
                Some(_) => {}
            }
            positions.extend_from_slice(&values[..3]);
            color_values.extend_from_slice(&values[3..]);
        }

        let mut faces = Vec::with_capacity(face_count);
        for _ in 0..face_count {
            let (_, line) = lines
                .next()
                .ok_or_else(|| parse_error(counts_line, "fewer faces than declared"))?;
            faces.push(line.to_string());
        }

        let vertices = NdArray::new(vec![vertex_count, 3], positions)?;
        let colors = match color_width {
            Some(width) if width > 0 => {
                Some(NdArray::new(vec![vertex_count, width], color_values)?)
            }
            _ => None,
        };
        Ok(Self {
            colored: colored || colors.is_some(),
            vertices,
            colors,
            faces,
            edge_count,
            comments,
            metadata,
        })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(if self.colored { "COFF\n" } else { "OFF\n" });
        for comment in &self.comments {
            out.push_str(comment);
            out.push('\n');
        }
        if let Some(json) = &self.metadata {
            out.push_str(OFF_METADATA_MARKER);
            out.push_str(json);
            out.push('\n');
        }
        let rows = self.vertices.shape()[0];
        out.push_str(&format!("{} {} {}\n", rows, self.faces.len(), self.edge_count));
        let positions = self.vertices.as_slice();
        for row in 0..rows {
            let mut fields: Vec<String> = positions[row * 3..row * 3 + 3]
                .iter()
                .map(|v| format_value(*v))
                .collect();
            if let Some(colors) = &self.colors {
                let width = colors.shape()[1];
                fields.extend(
                    colors.as_slice()[row * width..(row + 1) * width]
                        .iter()
                        .map(|v| format_value(*v)),
                );
            }
            out.push_str(&fields.join(" "));
            out.push('\n');
        }
        for face in &self.faces {
            out.push_str(face);
            out.push('\n');
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self, AssetError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), AssetError> {
        fs::write(path, self.to_text())?;
        Ok(())
    }
}

fn take_float(mesh: Option<MeshArray>, shape: &[usize]) -> Result<NdArray<f32>, AssetError> {
    let array = mesh
        .as_ref()
        .and_then(MeshArray::to_f32)
        .ok_or(AssetError::Layout("expected a float array"))?;
    if array.shape() != shape {
        return Err(AssetError::Layout("array shape changed"));
    }
    Ok(array)
}

impl AssetContainer for OffContainer {
    fn plaintext(&self) -> Result<Plaintext, AssetError> {
        let mut meshes = vec![MeshArray::Float32(self.vertices.clone())];
        if let Some(colors) = &self.colors {
            meshes.push(MeshArray::Float32(colors.clone()));
        }
        Ok(Plaintext::new(meshes, Vec::new()))
    }

    fn insert(&mut self, plaintext: Plaintext) -> Result<(), AssetError> {
        let expected = 1 + usize::from(self.colors.is_some());
        if plaintext.meshes.len() != expected || !plaintext.images.is_empty() {
            return Err(AssetError::Layout("array count changed"));
        }
        let mut meshes = plaintext.meshes.into_iter();
        let vertices = take_float(meshes.next(), self.vertices.shape())?;
        let colors = match &self.colors {
            Some(current) => Some(take_float(meshes.next(), current.shape())?),
            None => None,
        };
        self.vertices = vertices;
        self.colors = colors;
        Ok(())
    }

    fn embed_metadata(&mut self, aad: &AadData) -> Result<(), AssetError> {
        self.metadata = Some(serde_json::to_string(aad)?);
        Ok(())
    }

    fn retrieve_metadata(&mut self) -> Result<AadData, AssetError> {
        let aad = decode_metadata(self.metadata.as_deref())?;
        self.metadata = None;
        Ok(aad)
    }

    fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUBE: &str = "OFF
# unit square
4 2 0
0 0 0
1 0 0
1 1 0
0 1 0.5
3 0 1 2
3 0 2 3
";

    const COLORED: &str = "COFF
3 1 0
0.1 0.2 0.3 1 0 0 1
0.4 0.5 0.6 0 1 0 1
0.7 0.8 0.9 0 0 1 1
3 0 1 2
";

    #[test]
    fn parses_off() {
        let off = OffContainer::parse(CUBE).unwrap();
        assert_eq!(off.vertices().shape(), &[4, 3]);
        assert_eq!(off.vertices().as_slice()[11], 0.5);
        assert!(off.colors().is_none());
        assert_eq!(off.faces(), &["3 0 1 2".to_string(), "3 0 2 3".to_string()]);
    }

    #[test]
    fn parses_coff_colors() {
        let off = OffContainer::parse(COLORED).unwrap();
        let colors = off.colors().unwrap();
        assert_eq!(colors.shape(), &[3, 4]);
        assert_eq!(colors.as_slice()[4], 0.0);
        let plaintext = off.plaintext().unwrap();
        assert_eq!(plaintext.meshes.len(), 2);
    }

    #[test]
    fn header_counts_on_same_line() {
        let off = OffContainer::parse("OFF 1 0 0\n1.5 2.5 3.5\n").unwrap();
        assert_eq!(off.vertices().as_slice(), &[1.5f32, 2.5, 3.5]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            OffContainer::parse("PLY\n"),
            Err(AssetError::Parse { line: 1, .. })
        ));
        assert!(OffContainer::parse("OFF\n2 0 0\n1 2 3\n").is_err());
        assert!(OffContainer::parse("OFF\n1 0 0\n1 x 3\n").is_err());
        assert!(OffContainer::parse("COFF\n2 0 0\n1 2 3 1\n1 2 3\n").is_err());
    }

    #[test]
    fn text_roundtrip_is_exact() {
        let values: Vec<f32> = vec![0.1, -2.75e-7, 123456.79, 1.0 / 3.0, -0.0, 7.0];
        let vertices = NdArray::new(vec![2, 3], values.clone()).unwrap();
        let off = OffContainer::new(vertices, None, vec!["3 0 1 1".into()]).unwrap();
        let back = OffContainer::parse(&off.to_text()).unwrap();
        let bits: Vec<u32> = back.vertices().as_slice().iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
        assert_eq!(back.faces(), off.faces());
    }

    #[test]
    fn inflated_counts_are_parse_errors() {
        for text in [
            "OFF\n9999999999999999999 0 0\n1 2 3\n",
            "OFF\n1000 0 0\n1 2 3\n",
            "OFF\n1 4000000000000 0\n1 2 3\n3 0 0 0\n",
        ] {
            assert!(matches!(
                OffContainer::parse(text),
                Err(AssetError::Parse { line: 2, .. })
            ));
        }
    }

    #[test]
    fn non_finite_values_keep_their_bits() {
        let payload_nan = f32::from_bits(0x7fc1_2345);
        let values = vec![f32::INFINITY, payload_nan, 1.5, f32::NEG_INFINITY, -0.25, 3.0];
        let vertices = NdArray::new(vec![2, 3], values.clone()).unwrap();
        let off = OffContainer::new(vertices, None, vec![]).unwrap();
        let text = off.to_text();
        assert!(text.contains("0x7fc12345"));
        let back = OffContainer::parse(&text).unwrap();
        let bits: Vec<u32> = back.vertices().as_slice().iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn corrupt_metadata_is_not_consumed() {
        let text = format!("{CUBE}{OFF_METADATA_MARKER}{{\"version\": \n");
        let mut off = OffContainer::parse(&text).unwrap();
        assert!(off.has_metadata());
        assert!(matches!(off.retrieve_metadata(), Err(AssetError::Serde(_))));
        assert!(off.has_metadata());
    }

    #[test]
    fn metadata_is_taken_once() {
        let mut memory = MemoryContainer::new(Plaintext::default());
        assert!(!memory.has_metadata());
        assert!(matches!(
            memory.retrieve_metadata(),
            Err(AssetError::MissingMetadata)
        ));
    }

    #[test]
    fn insert_checks_layout() {
        let mut off = OffContainer::parse(CUBE).unwrap();
        let wrong = Plaintext::new(
            vec![MeshArray::Float32(NdArray::new(vec![1, 3], vec![0.0; 3]).unwrap())],
            vec![],
        );
        assert!(matches!(off.insert(wrong), Err(AssetError::Layout(_))));
        let same = off.plaintext().unwrap();
        off.insert(same).unwrap();
    }
}
