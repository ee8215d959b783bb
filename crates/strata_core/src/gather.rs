//! Columnar gather: project document fields into typed columns.
//!
//! For N documents and M typed fields, the gather produces per-field
//! validity/conversion/collision bitmaps (little-endian bit order), tightly
//! packed scalar arrays, and offset/length columns into one joined string
//! buffer. Everything except the joined strings lives in a single
//! contiguous arena block: bitmaps first, then the per-field data regions,
//! with offsets derived once up front.

use crate::arena::Arena;
use crate::error::StrataResult;
use crate::soa::{bit_get, bitmap_bytes, Places};
use crate::txn::{Transaction, TransactionManager};
use crate::types::{Options, LEN_MISSING};
use strata_codec::num::f16_bits_from_f32;
use strata_codec::{parse_any, pointer, DocFormat, Value};
use uuid::Uuid;

/// The column type a gathered field is projected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// No output; every cell is invalid.
    Null,
    /// One-byte booleans.
    Bool,
    /// 16-byte UUIDs.
    Uuid,
    /// Signed integers.
    I8,
    /// Signed integers.
    I16,
    /// Signed integers.
    I32,
    /// Signed integers.
    I64,
    /// Unsigned integers.
    U8,
    /// Unsigned integers.
    U16,
    /// Unsigned integers.
    U32,
    /// Unsigned integers.
    U64,
    /// Half-precision floats, stored as IEEE 754 binary16 bits.
    F16,
    /// Single-precision floats.
    F32,
    /// Double-precision floats.
    F64,
    /// Variable-length binary cells (offsets/lengths columns).
    Bin,
    /// Variable-length string cells (offsets/lengths columns).
    Str,
}

impl FieldType {
    /// Bytes per scalar cell; 0 for `Null` and the variable-length types.
    #[must_use]
    pub fn scalar_width(self) -> usize {
        match self {
            FieldType::Null | FieldType::Bin | FieldType::Str => 0,
            FieldType::Bool | FieldType::I8 | FieldType::U8 => 1,
            FieldType::I16 | FieldType::U16 | FieldType::F16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::U64 | FieldType::F64 => 8,
            FieldType::Uuid => 16,
        }
    }

    /// Whether this type produces offset/length columns instead of scalars.
    #[must_use]
    pub fn is_variable(self) -> bool {
        matches!(self, FieldType::Bin | FieldType::Str)
    }
}

/// One requested column: a field path (plain name or JSON Pointer) and the
/// type to project it into.
#[derive(Debug, Clone, Copy)]
pub struct GatherField<'a> {
    /// Field path; plain member name or slash-prefixed pointer.
    pub field: &'a str,
    /// Requested column type.
    pub ty: FieldType,
}

/// Numeric families for the conversion bit: a cell converts when the
/// stored value's family differs from the requested column's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Signed,
    Unsigned,
    Float,
    Bool,
    Uuid,
}

fn type_family(ty: FieldType) -> Option<Family> {
    match ty {
        FieldType::I8 | FieldType::I16 | FieldType::I32 | FieldType::I64 => Some(Family::Signed),
        FieldType::U8 | FieldType::U16 | FieldType::U32 | FieldType::U64 => {
            Some(Family::Unsigned)
        }
        FieldType::F16 | FieldType::F32 | FieldType::F64 => Some(Family::Float),
        FieldType::Bool => Some(Family::Bool),
        FieldType::Uuid => Some(Family::Uuid),
        FieldType::Null | FieldType::Bin | FieldType::Str => None,
    }
}

/// The derived offsets of one gather output block.
#[derive(Debug, Clone)]
pub struct GatherLayout {
    doc_count: usize,
    bitmap_slots: usize,
    /// `(type, data offset)` per field; variable-length fields store the
    /// offsets column at the data offset and the lengths column right
    /// after it.
    fields: Vec<(FieldType, usize)>,
    total: usize,
}

impl GatherLayout {
    fn new(doc_count: usize, fields: &[GatherField<'_>]) -> Self {
        let bitmap_slots = bitmap_bytes(doc_count);
        let bitmaps = 3 * bitmap_slots * fields.len();
        let mut cursor = bitmaps.next_multiple_of(8);
        let mut laid_out = Vec::with_capacity(fields.len());
        for spec in fields {
            laid_out.push((spec.ty, cursor));
            let bytes = if spec.ty.is_variable() {
                2 * 8 * doc_count
            } else {
                spec.ty.scalar_width() * doc_count
            };
            cursor += bytes.next_multiple_of(8);
        }
        Self {
            doc_count,
            bitmap_slots,
            fields: laid_out,
            total: cursor,
        }
    }

    /// Number of gathered documents (rows).
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    /// Number of gathered fields (columns).
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Block offset of a field's validity bitmap.
    #[must_use]
    pub fn validity_offset(&self, field: usize) -> usize {
        field * self.bitmap_slots
    }

    /// Block offset of a field's conversion bitmap.
    #[must_use]
    pub fn conversion_offset(&self, field: usize) -> usize {
        (self.fields.len() + field) * self.bitmap_slots
    }

    /// Block offset of a field's collision bitmap.
    #[must_use]
    pub fn collision_offset(&self, field: usize) -> usize {
        (2 * self.fields.len() + field) * self.bitmap_slots
    }

    /// Block offset of a field's scalar (or offsets) region.
    #[must_use]
    pub fn data_offset(&self, field: usize) -> usize {
        self.fields[field].1
    }

    /// Block offset of a variable-length field's lengths region.
    #[must_use]
    pub fn lengths_offset(&self, field: usize) -> usize {
        self.fields[field].1 + 8 * self.doc_count
    }

    /// The type of a field.
    #[must_use]
    pub fn field_type(&self, field: usize) -> FieldType {
        self.fields[field].0
    }

    /// Bytes in a bitmap.
    #[must_use]
    pub fn bitmap_slots(&self) -> usize {
        self.bitmap_slots
    }
}

/// Arena-resident gathered columns.
#[derive(Debug)]
pub struct GatherView<'a> {
    block: &'a [u8],
    strings: &'a [u8],
    layout: GatherLayout,
}

impl<'a> GatherView<'a> {
    /// The derived block layout.
    #[must_use]
    pub fn layout(&self) -> &GatherLayout {
        &self.layout
    }

    /// The contiguous output block.
    #[must_use]
    pub fn block(&self) -> &'a [u8] {
        self.block
    }

    /// The joined string/binary cell buffer.
    #[must_use]
    pub fn joined_strings(&self) -> &'a [u8] {
        self.strings
    }

    /// A field's validity bitmap.
    #[must_use]
    pub fn validity(&self, field: usize) -> &'a [u8] {
        let off = self.layout.validity_offset(field);
        &self.block[off..off + self.layout.bitmap_slots]
    }

    /// A field's conversion bitmap.
    #[must_use]
    pub fn conversions(&self, field: usize) -> &'a [u8] {
        let off = self.layout.conversion_offset(field);
        &self.block[off..off + self.layout.bitmap_slots]
    }

    /// A field's collision bitmap.
    #[must_use]
    pub fn collisions(&self, field: usize) -> &'a [u8] {
        let off = self.layout.collision_offset(field);
        &self.block[off..off + self.layout.bitmap_slots]
    }

    /// Whether a cell is valid.
    #[must_use]
    pub fn valid(&self, field: usize, doc: usize) -> bool {
        bit_get(self.validity(field), doc)
    }

    /// Whether a cell was converted from a different stored kind.
    #[must_use]
    pub fn converted(&self, field: usize, doc: usize) -> bool {
        bit_get(self.conversions(field), doc)
    }

    /// Whether a cell collided (structurally incompatible value).
    #[must_use]
    pub fn collided(&self, field: usize, doc: usize) -> bool {
        bit_get(self.collisions(field), doc)
    }

    /// A field's packed scalar region.
    #[must_use]
    pub fn scalars(&self, field: usize) -> &'a [u8] {
        let width = self.layout.field_type(field).scalar_width();
        let off = self.layout.data_offset(field);
        &self.block[off..off + width * self.layout.doc_count]
    }

    fn scalar_cell(&self, field: usize, doc: usize) -> &'a [u8] {
        let width = self.layout.field_type(field).scalar_width();
        let off = self.layout.data_offset(field) + width * doc;
        &self.block[off..off + width]
    }

    /// An `i8`/`i16`/`i32`/`i64` cell widened to `i64`.
    #[must_use]
    pub fn int_at(&self, field: usize, doc: usize) -> i64 {
        let cell = self.scalar_cell(field, doc);
        let mut wide = [0u8; 8];
        // Sign-extend little-endian cells.
        let fill = if cell.last().is_some_and(|&b| b & 0x80 != 0) {
            0xff
        } else {
            0
        };
        wide.fill(fill);
        wide[..cell.len()].copy_from_slice(cell);
        i64::from_le_bytes(wide)
    }

    /// A `u8`/`u16`/`u32`/`u64` cell widened to `u64`.
    #[must_use]
    pub fn uint_at(&self, field: usize, doc: usize) -> u64 {
        let cell = self.scalar_cell(field, doc);
        let mut wide = [0u8; 8];
        wide[..cell.len()].copy_from_slice(cell);
        u64::from_le_bytes(wide)
    }

    /// An `f64` cell.
    #[must_use]
    pub fn f64_at(&self, field: usize, doc: usize) -> f64 {
        let cell = self.scalar_cell(field, doc);
        f64::from_le_bytes(cell.try_into().unwrap_or([0; 8]))
    }

    /// An `f32` cell.
    #[must_use]
    pub fn f32_at(&self, field: usize, doc: usize) -> f32 {
        let cell = self.scalar_cell(field, doc);
        f32::from_le_bytes(cell.try_into().unwrap_or([0; 4]))
    }

    /// An `f16` cell's raw bits.
    #[must_use]
    pub fn f16_bits_at(&self, field: usize, doc: usize) -> u16 {
        let cell = self.scalar_cell(field, doc);
        u16::from_le_bytes(cell.try_into().unwrap_or([0; 2]))
    }

    /// A boolean cell.
    #[must_use]
    pub fn bool_at(&self, field: usize, doc: usize) -> bool {
        self.scalar_cell(field, doc)[0] != 0
    }

    /// A UUID cell.
    #[must_use]
    pub fn uuid_at(&self, field: usize, doc: usize) -> [u8; 16] {
        self.scalar_cell(field, doc).try_into().unwrap_or([0; 16])
    }

    fn u64_region_at(&self, offset: usize, doc: usize) -> u64 {
        let off = offset + 8 * doc;
        u64::from_le_bytes(self.block[off..off + 8].try_into().unwrap_or([0; 8]))
    }

    /// A string/binary cell's offset into the joined buffer.
    #[must_use]
    pub fn str_offset(&self, field: usize, doc: usize) -> u64 {
        self.u64_region_at(self.layout.data_offset(field), doc)
    }

    /// A string/binary cell's length; `LEN_MISSING` when absent.
    #[must_use]
    pub fn str_length(&self, field: usize, doc: usize) -> u64 {
        self.u64_region_at(self.layout.lengths_offset(field), doc)
    }

    /// A string/binary cell's bytes, `None` when absent.
    #[must_use]
    pub fn str_at(&self, field: usize, doc: usize) -> Option<&'a [u8]> {
        let length = self.str_length(field, doc);
        if length == LEN_MISSING {
            return None;
        }
        let offset = self.str_offset(field, doc) as usize;
        Some(&self.strings[offset..offset + length as usize])
    }
}

/// Per-cell bitmap outcome.
#[derive(Debug, Clone, Copy)]
struct CellBits {
    valid: bool,
    converted: bool,
    collided: bool,
}

impl CellBits {
    const INVALID: CellBits = CellBits {
        valid: false,
        converted: false,
        collided: false,
    };
    const COLLISION: CellBits = CellBits {
        valid: false,
        converted: false,
        collided: true,
    };

    fn valid(converted: bool) -> CellBits {
        CellBits {
            valid: true,
            converted,
            collided: false,
        }
    }
}

/// A numeric source value, pre-classified by family.
#[derive(Debug, Clone, Copy)]
enum NumSrc {
    I(i64),
    U(u64),
    F(f64),
    B(bool),
}

impl NumSrc {
    fn family(self) -> Family {
        match self {
            NumSrc::I(_) => Family::Signed,
            NumSrc::U(_) => Family::Unsigned,
            NumSrc::F(_) => Family::Float,
            NumSrc::B(_) => Family::Bool,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            NumSrc::I(n) => n as f64,
            NumSrc::U(n) => n as f64,
            NumSrc::F(f) => f,
            NumSrc::B(b) => f64::from(u8::from(b)),
        }
    }
}

macro_rules! cast_int {
    ($src:expr, $target:ty) => {
        match $src {
            NumSrc::I(n) => n as $target,
            NumSrc::U(n) => n as $target,
            NumSrc::F(f) => f as $target,
            NumSrc::B(b) => u8::from(b) as $target,
        }
    };
}

/// Writes a numeric source into a scalar cell of the requested type.
fn write_numeric(ty: FieldType, cell: &mut [u8], src: NumSrc) {
    match ty {
        FieldType::Bool => {
            let truthy = match src {
                NumSrc::I(n) => n != 0,
                NumSrc::U(n) => n != 0,
                NumSrc::F(f) => f != 0.0,
                NumSrc::B(b) => b,
            };
            cell[0] = u8::from(truthy);
        }
        FieldType::I8 => cell.copy_from_slice(&cast_int!(src, i8).to_le_bytes()),
        FieldType::I16 => cell.copy_from_slice(&cast_int!(src, i16).to_le_bytes()),
        FieldType::I32 => cell.copy_from_slice(&cast_int!(src, i32).to_le_bytes()),
        FieldType::I64 => cell.copy_from_slice(&cast_int!(src, i64).to_le_bytes()),
        FieldType::U8 => cell.copy_from_slice(&cast_int!(src, u8).to_le_bytes()),
        FieldType::U16 => cell.copy_from_slice(&cast_int!(src, u16).to_le_bytes()),
        FieldType::U32 => cell.copy_from_slice(&cast_int!(src, u32).to_le_bytes()),
        FieldType::U64 => cell.copy_from_slice(&cast_int!(src, u64).to_le_bytes()),
        FieldType::F16 => {
            cell.copy_from_slice(&f16_bits_from_f32(src.as_f64() as f32).to_le_bytes());
        }
        FieldType::F32 => cell.copy_from_slice(&(src.as_f64() as f32).to_le_bytes()),
        FieldType::F64 => cell.copy_from_slice(&src.as_f64().to_le_bytes()),
        FieldType::Uuid | FieldType::Null | FieldType::Bin | FieldType::Str => {}
    }
}

/// Parses an entire string as the requested scalar type into `cell`.
/// Partial parses fail, `from_chars`-style.
fn parse_str_into(text: &str, ty: FieldType, cell: &mut [u8]) -> bool {
    match ty {
        FieldType::Bool => match text {
            "true" => {
                cell[0] = 1;
                true
            }
            "false" => {
                cell[0] = 0;
                true
            }
            _ => false,
        },
        FieldType::I8 => write_parsed::<i8>(text, cell),
        FieldType::I16 => write_parsed::<i16>(text, cell),
        FieldType::I32 => write_parsed::<i32>(text, cell),
        FieldType::I64 => write_parsed::<i64>(text, cell),
        FieldType::U8 => write_parsed::<u8>(text, cell),
        FieldType::U16 => write_parsed::<u16>(text, cell),
        FieldType::U32 => write_parsed::<u32>(text, cell),
        FieldType::U64 => write_parsed::<u64>(text, cell),
        FieldType::F16 => match text.parse::<f32>() {
            Ok(f) => {
                cell.copy_from_slice(&f16_bits_from_f32(f).to_le_bytes());
                true
            }
            Err(_) => false,
        },
        FieldType::F32 => write_parsed::<f32>(text, cell),
        FieldType::F64 => write_parsed::<f64>(text, cell),
        FieldType::Uuid => match Uuid::parse_str(text) {
            Ok(uuid) => {
                cell.copy_from_slice(uuid.as_bytes());
                true
            }
            Err(_) => false,
        },
        FieldType::Null | FieldType::Bin | FieldType::Str => false,
    }
}

trait LeBytes: std::str::FromStr {
    fn write_le(self, cell: &mut [u8]);
}

macro_rules! impl_le_bytes {
    ($($ty:ty),*) => {$(
        impl LeBytes for $ty {
            fn write_le(self, cell: &mut [u8]) {
                cell.copy_from_slice(&self.to_le_bytes());
            }
        }
    )*};
}
impl_le_bytes!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

fn write_parsed<T: LeBytes>(text: &str, cell: &mut [u8]) -> bool {
    match text.parse::<T>() {
        Ok(value) => {
            value.write_le(cell);
            true
        }
        Err(_) => false,
    }
}

/// Projects one value into a scalar cell.
fn export_scalar_cell(value: &Value, ty: FieldType, cell: &mut [u8]) -> CellBits {
    let target_family = match type_family(ty) {
        Some(family) => family,
        None => return CellBits::INVALID, // Null column: nothing to store.
    };
    match value {
        Value::Null => CellBits::INVALID,
        Value::Array(_) | Value::Object(_) => CellBits::COLLISION,
        Value::Bin(bytes) => {
            // Width-matched binary copies straight into the scalar.
            if bytes.len() == cell.len() && !cell.is_empty() {
                cell.copy_from_slice(bytes);
                CellBits::valid(false)
            } else {
                CellBits::COLLISION
            }
        }
        Value::Str(text) => {
            if parse_str_into(text, ty, cell) {
                CellBits::valid(true)
            } else {
                CellBits::COLLISION
            }
        }
        Value::Bool(b) => {
            if target_family == Family::Uuid {
                return CellBits::COLLISION;
            }
            write_numeric(ty, cell, NumSrc::B(*b));
            CellBits::valid(target_family != Family::Bool)
        }
        Value::Int(n) => {
            if target_family == Family::Uuid {
                return CellBits::COLLISION;
            }
            write_numeric(ty, cell, NumSrc::I(*n));
            CellBits::valid(target_family != Family::Signed)
        }
        Value::Uint(n) => {
            if target_family == Family::Uuid {
                return CellBits::COLLISION;
            }
            write_numeric(ty, cell, NumSrc::U(*n));
            CellBits::valid(target_family != Family::Unsigned)
        }
        Value::Float(f) => {
            if target_family == Family::Uuid {
                return CellBits::COLLISION;
            }
            write_numeric(ty, cell, NumSrc::F(*f));
            CellBits::valid(target_family != Family::Float)
        }
    }
}

/// The length of the buffer used to print numeric cells into strings.
const PRINT_BUF_LEN: usize = 32;

/// Projects one value into a string/binary cell, appending to `strings`.
/// Returns the bitmap outcome and the `(offset, length)` pair.
fn export_string_cell(value: &Value, strings: &mut Vec<u8>, base: usize) -> (CellBits, u64, u64) {
    let offset = (strings.len() - base) as u64;
    match value {
        Value::Null => (CellBits::INVALID, LEN_MISSING, LEN_MISSING),
        Value::Array(_) | Value::Object(_) => (CellBits::COLLISION, LEN_MISSING, LEN_MISSING),
        Value::Bin(bytes) => {
            strings.extend_from_slice(bytes);
            (CellBits::valid(false), offset, bytes.len() as u64)
        }
        Value::Str(text) => {
            strings.extend_from_slice(text.as_bytes());
            strings.push(0);
            (CellBits::valid(false), offset, text.len() as u64)
        }
        Value::Bool(b) => {
            let text: &[u8] = if *b { b"true" } else { b"false" };
            strings.extend_from_slice(text);
            strings.push(0);
            (CellBits::valid(true), offset, text.len() as u64)
        }
        Value::Int(n) => print_number(&n.to_string(), strings, offset),
        Value::Uint(n) => print_number(&n.to_string(), strings, offset),
        Value::Float(f) => print_number(&format!("{f:.6}"), strings, offset),
    }
}

fn print_number(printed: &str, strings: &mut Vec<u8>, offset: u64) -> (CellBits, u64, u64) {
    if printed.len() + 1 > PRINT_BUF_LEN {
        // Print-buffer overflow: converted but unusable.
        let bits = CellBits {
            valid: false,
            converted: true,
            collided: true,
        };
        return (bits, LEN_MISSING, LEN_MISSING);
    }
    strings.extend_from_slice(printed.as_bytes());
    strings.push(0);
    (CellBits::valid(true), offset, printed.len() as u64)
}

enum FieldSelector {
    Name(String),
    Pointer(Vec<String>),
}

/// Gathers typed columns from a set of documents.
pub fn docs_gather<'a>(
    manager: &TransactionManager,
    mut txn: Option<&mut Transaction>,
    places: Places<'_>,
    fields: &[GatherField<'_>],
    options: &Options,
    arena: &'a mut Arena,
) -> StrataResult<GatherView<'a>> {
    // Pre-parse field selectors, rejecting malformed pointers up front.
    let mut selectors = Vec::with_capacity(fields.len());
    for spec in fields {
        if spec.field.starts_with('/') {
            selectors.push(FieldSelector::Pointer(pointer::parse_pointer(spec.field)?));
        } else {
            selectors.push(FieldSelector::Name(spec.field.to_string()));
        }
    }

    // Fetch and parse every document row.
    let snapshot = manager.committed_seq().as_u64();
    let mut docs = Vec::with_capacity(places.count);
    for task in 0..places.count {
        let (collection, key) = places.get(task);
        let bytes = match txn.as_deref_mut() {
            Some(txn) => manager.get(txn, collection, key, options.track_reads)?,
            None => manager
                .backend()
                .get_at(collection.as_u32(), key, Some(snapshot))?,
        };
        docs.push(match bytes {
            None => Value::Null,
            Some(bytes) if bytes.is_empty() => Value::Null,
            Some(bytes) => parse_any(&bytes, DocFormat::INTERNAL)?,
        });
    }

    if !options.dont_discard_memory {
        arena.discard();
    }
    let layout = GatherLayout::new(places.count, fields);
    let block_start = arena.block.len();
    arena.block.resize(block_start + layout.total, 0);
    let strings_start = arena.string_tape.len();

    let null_value = Value::Null;
    for (doc_idx, doc) in docs.iter().enumerate() {
        for (field_idx, selector) in selectors.iter().enumerate() {
            let ty = layout.field_type(field_idx);
            let value = match selector {
                FieldSelector::Name(name) => doc.get(name).unwrap_or(&null_value),
                FieldSelector::Pointer(tokens) => {
                    pointer::resolve(doc, tokens).unwrap_or(&null_value)
                }
            };

            let bits = if ty.is_variable() {
                let (bits, offset, length) =
                    export_string_cell(value, &mut arena.string_tape, strings_start);
                let data = block_start + layout.data_offset(field_idx) + 8 * doc_idx;
                arena.block[data..data + 8].copy_from_slice(&offset.to_le_bytes());
                let lengths = block_start + layout.lengths_offset(field_idx) + 8 * doc_idx;
                arena.block[lengths..lengths + 8].copy_from_slice(&length.to_le_bytes());
                bits
            } else {
                let width = ty.scalar_width();
                let data = block_start + layout.data_offset(field_idx) + width * doc_idx;
                export_scalar_cell(value, ty, &mut arena.block[data..data + width])
            };

            set_bitmap_bit(
                &mut arena.block[block_start..],
                layout.validity_offset(field_idx),
                doc_idx,
                bits.valid,
            );
            set_bitmap_bit(
                &mut arena.block[block_start..],
                layout.conversion_offset(field_idx),
                doc_idx,
                bits.converted,
            );
            set_bitmap_bit(
                &mut arena.block[block_start..],
                layout.collision_offset(field_idx),
                doc_idx,
                bits.collided,
            );
        }
    }

    Ok(GatherView {
        block: &arena.block[block_start..],
        strings: &arena.string_tape[strings_start..],
        layout,
    })
}

fn set_bitmap_bit(block: &mut [u8], bitmap_offset: usize, doc: usize, value: bool) {
    let mask = 1u8 << (doc % 8);
    if value {
        block[bitmap_offset + doc / 8] |= mask;
    } else {
        block[bitmap_offset + doc / 8] &= !mask;
    }
}
