//! Names predefined by WGSL.
//!
//! Calls and type references to these never leave the module they appear in,
//! so the grammar and the traversal both skip them.

/// Built-in and reserved functions callable without any declaration.
pub const BUILTIN_FNS: &[&str] = &[
    // Constructors & conversion
    "bool", "f16", "f32", "i32", "u32", "mat2x2", "mat2x3", "mat2x4", "mat3x2", "mat3x3",
    "mat3x4", "mat4x2", "mat4x3", "mat4x4", "vec2", "vec3", "vec4", "bitcast", "array",
    // Logical / comparison
    "all", "any", "select",
    // Array
    "arrayLength",
    // Numeric
    "abs", "acos", "acosh", "asin", "asinh", "atan", "atanh", "atan2", "ceil", "clamp", "cos",
    "cosh", "countLeadingZeros", "countOneBits", "countTrailingZeros", "cross", "degrees",
    "determinant", "distance", "dot", "exp", "exp2", "extractBits", "faceForward", "firstLeadingBit",
    "firstTrailingBit", "floor", "fma", "fract", "frexp", "insertBits", "inverseSqrt", "ldexp",
    "length", "log", "log2", "max", "min", "mix", "modf", "normalize", "pow", "quantizeToF16",
    "radians", "reflect", "refract", "reverseBits", "round", "saturate", "sign", "sin", "sinh",
    "smoothstep", "sqrt", "step", "tan", "tanh", "transpose", "trunc",
    // Derivative
    "dpdx", "dpdxCoarse", "dpdxFine", "dpdy", "dpdyCoarse", "dpdyFine", "fwidth", "fwidthCoarse",
    "fwidthFine",
    // Texture
    "textureDimensions", "textureGather", "textureGatherCompare", "textureLoad",
    "textureNumLayers", "textureNumLevels", "textureNumSamples", "textureSample",
    "textureSampleBias", "textureSampleCompare", "textureSampleCompareLevel", "textureSampleGrad",
    "textureSampleLevel", "textureSampleBaseClampToEdge", "textureStore",
    // Atomic
    "atomicLoad", "atomicStore", "atomicAdd", "atomicSub", "atomicMax", "atomicMin", "atomicAnd",
    "atomicOr", "atomicXor", "atomicExchange", "atomicCompareExchangeWeak",
    // Data packing
    "pack4x8snorm", "pack4x8unorm", "pack2x16snorm", "pack2x16unorm", "pack2x16float",
    "unpack4x8snorm", "unpack4x8unorm", "unpack2x16snorm", "unpack2x16unorm", "unpack2x16float",
    // Synchronization
    "storageBarrier", "textureBarrier", "workgroupBarrier", "workgroupUniformLoad",
];

/// Predeclared types, type generators, and enumerants usable in type position.
pub const BUILTIN_TYPES: &[&str] = &[
    "bool", "f16", "f32", "i32", "u32", "sampler", "sampler_comparison", "array", "atomic", "ptr",
    "mat2x2", "mat2x3", "mat2x4", "mat3x2", "mat3x3", "mat3x4", "mat4x2", "mat4x3", "mat4x4",
    "vec2", "vec3", "vec4", "vec2i", "vec3i", "vec4i", "vec2u", "vec3u", "vec4u", "vec2f", "vec3f",
    "vec4f", "vec2h", "vec3h", "vec4h", "mat2x2f", "mat2x3f", "mat2x4f", "mat3x2f", "mat3x3f",
    "mat3x4f", "mat4x2f", "mat4x3f", "mat4x4f", "mat2x2h", "mat2x3h", "mat2x4h", "mat3x2h",
    "mat3x3h", "mat3x4h", "mat4x2h", "mat4x3h", "mat4x4h", "texture_1d", "texture_2d",
    "texture_2d_array", "texture_3d", "texture_cube", "texture_cube_array",
    "texture_multisampled_2d", "texture_depth_multisampled_2d", "texture_external",
    "texture_storage_1d", "texture_storage_2d", "texture_storage_2d_array", "texture_storage_3d",
    "texture_depth_2d", "texture_depth_2d_array", "texture_depth_cube",
    "texture_depth_cube_array",
    // Address spaces, access modes and texel formats also appear inside
    // template argument lists.
    "function", "private", "workgroup", "uniform", "storage", "read", "write", "read_write",
    "rgba8unorm", "rgba8snorm", "rgba8uint", "rgba8sint", "rgba16uint", "rgba16sint",
    "rgba16float", "r32uint", "r32sint", "r32float", "rg32uint", "rg32sint", "rg32float",
    "rgba32uint", "rgba32sint", "rgba32float", "bgra8unorm",
];

/// Statement keywords that look like calls (`if (x)`) but are not.
pub const CALLISH_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "loop", "switch", "return", "break", "continue", "discard",
    "const_assert", "let", "var", "const",
];

/// True when `name` may be called without being declared anywhere.
#[must_use]
pub fn is_builtin_fn(name: &str) -> bool {
    BUILTIN_FNS.contains(&name)
}

/// True when `name` is a predeclared type or type-position enumerant.
#[must_use]
pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_TYPES.contains(&name)
}
