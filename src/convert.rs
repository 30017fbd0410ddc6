//! Sample format conversion between the wire ("otw") representation and host ("cpu")
//!  representation. All formats are complex: an item is an I and a Q component.
//!
//! Wire components are stored in the link's byte order, host components in native byte order.

use std::fmt::{Display, Formatter};
use bytes::{Buf, BufMut};
use crate::chdr::Endianness;
use crate::error::{Result, TransportError};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OtwFormat {
    Sc16,
    Sc8,
}

impl OtwFormat {
    pub fn bytes_per_item(self) -> usize {
        2 * self.component().size()
    }

    fn component(self) -> Component {
        match self {
            OtwFormat::Sc16 => Component::I16,
            OtwFormat::Sc8 => Component::I8,
        }
    }
}

impl Display for OtwFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OtwFormat::Sc16 => write!(f, "sc16"),
            OtwFormat::Sc8 => write!(f, "sc8"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CpuFormat {
    Fc64,
    Fc32,
    Sc16,
    Sc8,
}

impl CpuFormat {
    pub fn bytes_per_item(self) -> usize {
        2 * self.component().size()
    }

    fn component(self) -> Component {
        match self {
            CpuFormat::Fc64 => Component::F64,
            CpuFormat::Fc32 => Component::F32,
            CpuFormat::Sc16 => Component::I16,
            CpuFormat::Sc8 => Component::I8,
        }
    }
}

impl Display for CpuFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuFormat::Fc64 => write!(f, "fc64"),
            CpuFormat::Fc32 => write!(f, "fc32"),
            CpuFormat::Sc16 => write!(f, "sc16"),
            CpuFormat::Sc8 => write!(f, "sc8"),
        }
    }
}

/// Converts `num_items` items from `input` to `output`. Both slices must hold at least
///  `num_items` items of their respective format.
pub trait Converter: Send {
    fn convert(&self, input: &[u8], output: &mut [u8], num_items: usize);

    /// The factor applied to every component value
    fn set_scalar(&mut self, scalar: f64);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Component {
    F64,
    F32,
    I16,
    I8,
}

impl Component {
    fn size(self) -> usize {
        match self {
            Component::F64 => 8,
            Component::F32 => 4,
            Component::I16 => 2,
            Component::I8 => 1,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Component::F64 | Component::F32)
    }

    /// The full-scale value of an integer component
    fn full_scale(self) -> f64 {
        match self {
            Component::I16 => i16::MAX as f64,
            Component::I8 => i8::MAX as f64,
            _ => 1.0,
        }
    }

    fn read(self, mut buf: &[u8], endianness: Endianness) -> f64 {
        match (self, endianness) {
            (Component::F64, Endianness::Big) => buf.get_f64(),
            (Component::F64, Endianness::Little) => buf.get_f64_le(),
            (Component::F32, Endianness::Big) => buf.get_f32() as f64,
            (Component::F32, Endianness::Little) => buf.get_f32_le() as f64,
            (Component::I16, e) => e.get_i16(&mut buf) as f64,
            (Component::I8, _) => buf.get_i8() as f64,
        }
    }

    fn write(self, mut buf: &mut [u8], endianness: Endianness, value: f64) {
        match (self, endianness) {
            (Component::F64, Endianness::Big) => buf.put_f64(value),
            (Component::F64, Endianness::Little) => buf.put_f64_le(value),
            (Component::F32, Endianness::Big) => buf.put_f32(value as f32),
            (Component::F32, Endianness::Little) => buf.put_f32_le(value as f32),
            (Component::I16, e) => e.put_i16(&mut buf, value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16),
            (Component::I8, _) => buf.put_i8(value.round().clamp(i8::MIN as f64, i8::MAX as f64) as i8),
        }
    }
}

fn native_endianness() -> Endianness {
    if cfg!(target_endian = "big") {
        Endianness::Big
    }
    else {
        Endianness::Little
    }
}

struct ComponentConverter {
    input: Component,
    input_order: Endianness,
    output: Component,
    output_order: Endianness,
    scalar: f64,
}

impl ComponentConverter {
    fn is_plain_copy(&self) -> bool {
        self.input == self.output && self.input_order == self.output_order && self.scalar == 1.0
    }
}

impl Converter for ComponentConverter {
    fn convert(&self, input: &[u8], output: &mut [u8], num_items: usize) {
        let in_len = 2 * num_items * self.input.size();
        let out_len = 2 * num_items * self.output.size();
        debug_assert!(input.len() >= in_len, "input of {} bytes is too short for {} items", input.len(), num_items);
        debug_assert!(output.len() >= out_len, "output of {} bytes is too short for {} items", output.len(), num_items);

        if self.is_plain_copy() {
            output[..out_len].copy_from_slice(&input[..in_len]);
            return;
        }

        let src = input[..in_len].chunks_exact(self.input.size());
        let dst = output[..out_len].chunks_exact_mut(self.output.size());
        for (src, dst) in src.zip(dst) {
            let value = self.input.read(src, self.input_order) * self.scalar;
            self.output.write(dst, self.output_order, value);
        }
    }

    fn set_scalar(&mut self, scalar: f64) {
        self.scalar = scalar;
    }
}

/// The default scalar maps integer full scale to +/-1.0 for floats. Integer to integer
///  conversion keeps values unchanged.
fn default_scalar(input: Component, output: Component) -> f64 {
    match (input.is_float(), output.is_float()) {
        (false, true) => 1.0 / input.full_scale(),
        (true, false) => output.full_scale(),
        _ => 1.0,
    }
}

fn unsupported(otw: OtwFormat, cpu: CpuFormat) -> TransportError {
    TransportError::UnsupportedConversion {
        otw: otw.to_string(),
        cpu: cpu.to_string(),
    }
}

/// A converter from wire format to host format, for received samples
pub fn get_rx_converter(otw: OtwFormat, cpu: CpuFormat, endianness: Endianness) -> Result<Box<dyn Converter>> {
    if matches!((otw, cpu), (OtwFormat::Sc16, CpuFormat::Sc8)) {
        return Err(unsupported(otw, cpu));
    }

    Ok(Box::new(ComponentConverter {
        input: otw.component(),
        input_order: endianness,
        output: cpu.component(),
        output_order: native_endianness(),
        scalar: default_scalar(otw.component(), cpu.component()),
    }))
}

/// A converter from host format to wire format, for samples to be sent
pub fn get_tx_converter(cpu: CpuFormat, otw: OtwFormat, endianness: Endianness) -> Result<Box<dyn Converter>> {
    if matches!((cpu, otw), (CpuFormat::Sc8, OtwFormat::Sc16) | (CpuFormat::Sc16, OtwFormat::Sc8)) {
        return Err(unsupported(otw, cpu));
    }

    Ok(Box::new(ComponentConverter {
        input: cpu.component(),
        input_order: native_endianness(),
        output: otw.component(),
        output_order: endianness,
        scalar: default_scalar(cpu.component(), otw.component()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::test_util::{f32s, f64s, i16s};

    fn sc16_wire(values: &[i16], endianness: Endianness) -> Vec<u8> {
        let mut result = Vec::new();
        for &v in values {
            endianness.put_i16(&mut result, v);
        }
        result
    }

    #[rstest]
    #[case(OtwFormat::Sc16, 4)]
    #[case(OtwFormat::Sc8, 2)]
    fn test_otw_bytes_per_item(#[case] format: OtwFormat, #[case] expected: usize) {
        assert_eq!(format.bytes_per_item(), expected);
    }

    #[rstest]
    #[case(CpuFormat::Fc64, 16, "fc64")]
    #[case(CpuFormat::Fc32, 8, "fc32")]
    #[case(CpuFormat::Sc16, 4, "sc16")]
    #[case(CpuFormat::Sc8, 2, "sc8")]
    fn test_cpu_format(#[case] format: CpuFormat, #[case] bytes: usize, #[case] name: &str) {
        assert_eq!(format.bytes_per_item(), bytes);
        assert_eq!(format.to_string(), name);
    }

    #[rstest]
    #[case::big(Endianness::Big)]
    #[case::little(Endianness::Little)]
    fn test_sc16_to_fc32(#[case] endianness: Endianness) {
        let conv = get_rx_converter(OtwFormat::Sc16, CpuFormat::Fc32, endianness).unwrap();
        let input = sc16_wire(&[32767, -32767, 0, 16384], endianness);
        let mut output = vec![0u8; 2 * 8];
        conv.convert(&input, &mut output, 2);

        let samples = f32s(&output);
        assert_eq!(samples[0], 1.0);
        assert_eq!(samples[1], -1.0);
        assert_eq!(samples[2], 0.0);
        assert!((samples[3] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_sc8_to_fc64() {
        let conv = get_rx_converter(OtwFormat::Sc8, CpuFormat::Fc64, Endianness::Big).unwrap();
        let input = [127u8, 0x81, 0, 0];
        let mut output = vec![0u8; 2 * 16];
        conv.convert(&input, &mut output, 2);

        assert_eq!(f64s(&output), vec![1.0, -1.0, 0.0, 0.0]);
    }

    #[rstest]
    #[case::same_order(Endianness::Little)]
    #[case::swapped(Endianness::Big)]
    fn test_sc16_to_sc16(#[case] endianness: Endianness) {
        let conv = get_rx_converter(OtwFormat::Sc16, CpuFormat::Sc16, endianness).unwrap();
        let input = sc16_wire(&[1, -2, 300, i16::MIN], endianness);
        let mut output = vec![0u8; 8];
        conv.convert(&input, &mut output, 2);

        assert_eq!(i16s(&output), vec![1, -2, 300, i16::MIN]);
    }

    #[test]
    fn test_fc32_to_sc16_clamps() {
        let conv = get_tx_converter(CpuFormat::Fc32, OtwFormat::Sc16, Endianness::Big).unwrap();
        let input: Vec<f32> = vec![1.0, -1.0, 2.0, 0.5];
        let mut output = vec![0u8; 8];
        conv.convert(bytemuck::cast_slice(&input), &mut output, 2);

        assert_eq!(output, sc16_wire(&[32767, -32767, 32767, 16384], Endianness::Big));
    }

    #[test]
    fn test_set_scalar() {
        let mut conv = get_rx_converter(OtwFormat::Sc16, CpuFormat::Fc64, Endianness::Big).unwrap();
        conv.set_scalar(0.5);
        let input = sc16_wire(&[4, -8], Endianness::Big);
        let mut output = vec![0u8; 16];
        conv.convert(&input, &mut output, 1);

        assert_eq!(f64s(&output), vec![2.0, -4.0]);
    }

    #[test]
    fn test_rx_tx_inverse() {
        let tx = get_tx_converter(CpuFormat::Fc64, OtwFormat::Sc16, Endianness::Little).unwrap();
        let rx = get_rx_converter(OtwFormat::Sc16, CpuFormat::Fc64, Endianness::Little).unwrap();

        let input: Vec<f64> = vec![0.25, -0.75, 0.999, -0.001];
        let mut wire = vec![0u8; 8];
        tx.convert(bytemuck::cast_slice(&input), &mut wire, 2);
        let mut output = vec![0u8; 32];
        rx.convert(&wire, &mut output, 2);

        for (a, b) in input.iter().zip(f64s(&output)) {
            assert!((a - b).abs() < 1.0 / 32767.0);
        }
    }

    #[rstest]
    #[case::rx_narrowing(true, OtwFormat::Sc16, CpuFormat::Sc8)]
    #[case::tx_widening(false, OtwFormat::Sc16, CpuFormat::Sc8)]
    #[case::tx_narrowing(false, OtwFormat::Sc8, CpuFormat::Sc16)]
    fn test_unsupported(#[case] rx: bool, #[case] otw: OtwFormat, #[case] cpu: CpuFormat) {
        let result = if rx {
            get_rx_converter(otw, cpu, Endianness::Big)
        }
        else {
            get_tx_converter(cpu, otw, Endianness::Big)
        };
        assert!(matches!(result, Err(TransportError::UnsupportedConversion { .. })));
    }
}
