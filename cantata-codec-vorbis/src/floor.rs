// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;
use std::collections::HashSet;
use std::io;

use cantata_core::errors::{decode_error, Error, Result};
use cantata_core::io::{BitReaderRtl, ReadBitsRtl};

use super::codebook::VorbisCodebook;
use super::common::ilog;

/// As defined in section 10.1 of the Vorbis I specification.
#[allow(clippy::unreadable_literal)]
#[allow(clippy::excessive_precision)]
#[rustfmt::skip]
const FLOOR1_INVERSE_DB_TABLE: [f32; 256] = [
    1.0649863e-07, 1.1341951e-07, 1.2079015e-07, 1.2863978e-07,
    1.3699951e-07, 1.4590251e-07, 1.5538408e-07, 1.6548181e-07,
    1.7623575e-07, 1.8768855e-07, 1.9988561e-07, 2.1287530e-07,
    2.2670913e-07, 2.4144197e-07, 2.5713223e-07, 2.7384213e-07,
    2.9163793e-07, 3.1059021e-07, 3.3077411e-07, 3.5226968e-07,
    3.7516214e-07, 3.9954229e-07, 4.2550680e-07, 4.5315863e-07,
    4.8260743e-07, 5.1396998e-07, 5.4737065e-07, 5.8294187e-07,
    6.2082472e-07, 6.6116941e-07, 7.0413592e-07, 7.4989464e-07,
    7.9862701e-07, 8.5052630e-07, 9.0579828e-07, 9.6466216e-07,
    1.0273513e-06, 1.0941144e-06, 1.1652161e-06, 1.2409384e-06,
    1.3215816e-06, 1.4074654e-06, 1.4989305e-06, 1.5963394e-06,
    1.7000785e-06, 1.8105592e-06, 1.9282195e-06, 2.0535261e-06,
    2.1869758e-06, 2.3290978e-06, 2.4804557e-06, 2.6416497e-06,
    2.8133190e-06, 2.9961443e-06, 3.1908506e-06, 3.3982101e-06,
    3.6190449e-06, 3.8542308e-06, 4.1047004e-06, 4.3714470e-06,
    4.6555282e-06, 4.9580707e-06, 5.2802740e-06, 5.6234160e-06,
    5.9888572e-06, 6.3780469e-06, 6.7925283e-06, 7.2339451e-06,
    7.7040476e-06, 8.2047000e-06, 8.7378876e-06, 9.3057248e-06,
    9.9104632e-06, 1.0554501e-05, 1.1240392e-05, 1.1970856e-05,
    1.2748789e-05, 1.3577278e-05, 1.4459606e-05, 1.5399272e-05,
    1.6400004e-05, 1.7465768e-05, 1.8600792e-05, 1.9809576e-05,
    2.1096914e-05, 2.2467911e-05, 2.3928002e-05, 2.5482978e-05,
    2.7139006e-05, 2.8902651e-05, 3.0780908e-05, 3.2781225e-05,
    3.4911534e-05, 3.7180282e-05, 3.9596466e-05, 4.2169667e-05,
    4.4910090e-05, 4.7828601e-05, 5.0936773e-05, 5.4246931e-05,
    5.7772202e-05, 6.1526565e-05, 6.5524908e-05, 6.9783085e-05,
    7.4317983e-05, 7.9147585e-05, 8.4291040e-05, 8.9768747e-05,
    9.5602426e-05, 0.00010181521, 0.00010843174, 0.00011547824,
    0.00012298267, 0.00013097477, 0.00013948625, 0.00014855085,
    0.00015820453, 0.00016848555, 0.00017943469, 0.00019109536,
    0.00020351382, 0.00021673929, 0.00023082423, 0.00024582449,
    0.00026179955, 0.00027881276, 0.00029693158, 0.00031622787,
    0.00033677814, 0.00035866388, 0.00038197188, 0.00040679456,
    0.00043323036, 0.00046138411, 0.00049136745, 0.00052329927,
    0.00055730621, 0.00059352311, 0.00063209358, 0.00067317058,
    0.00071691700, 0.00076350630, 0.00081312324, 0.00086596457,
    0.00092223983, 0.00098217216, 0.0010459992,  0.0011139742,
    0.0011863665,  0.0012634633,  0.0013455702,  0.0014330129,
    0.0015261382,  0.0016253153,  0.0017309374,  0.0018434235,
    0.0019632195,  0.0020908006,  0.0022266726,  0.0023713743,
    0.0025254795,  0.0026895994,  0.0028643847,  0.0030505286,
    0.0032487691,  0.0034598925,  0.0036847358,  0.0039241906,
    0.0041792066,  0.0044507950,  0.0047400328,  0.0050480668,
    0.0053761186,  0.0057254891,  0.0060975636,  0.0064938176,
    0.0069158225,  0.0073652516,  0.0078438871,  0.0083536271,
    0.0088964928,  0.009474637,   0.010090352,   0.010746080,
    0.011444421,   0.012188144,   0.012980198,   0.013823725,
    0.014722068,   0.015678791,   0.016697687,   0.017782797,
    0.018938423,   0.020169149,   0.021479854,   0.022875735,
    0.024362330,   0.025945531,   0.027631618,   0.029427276,
    0.031339626,   0.033376252,   0.035545228,   0.037855157,
    0.040315199,   0.042935108,   0.045725273,   0.048696758,
    0.051861348,   0.055231591,   0.058820850,   0.062643361,
    0.066714279,   0.071049749,   0.075666962,   0.080584227,
    0.085821044,   0.091398179,   0.097337747,   0.10366330,
    0.11039993,    0.11757434,    0.12521498,    0.13335215,
    0.14201813,    0.15124727,    0.16107617,    0.17154380,
    0.18269168,    0.19456402,    0.20720788,    0.22067342,
    0.23501402,    0.25028656,    0.26655159,    0.28387361,
    0.30232132,    0.32196786,    0.34289114,    0.36517414,
    0.38890521,    0.41417847,    0.44109412,    0.46975890,
    0.50028648,    0.53279791,    0.56742212,    0.60429640,
    0.64356699,    0.68538959,    0.72993007,    0.77736504,
    0.82788260,    0.88168307,    0.9389798,     1.0,
];

/// Returns `true` if the error marks the end of the packet bitstream, which is a legal way for
/// a floor to end early.
#[inline(always)]
fn is_end_of_packet(e: &Error) -> bool {
    matches!(e, Error::IoError(io_err) if io_err.kind() == io::ErrorKind::Other)
}

pub trait Floor: Send + Sync {
    fn read_channel(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
    ) -> Result<()>;

    fn is_unused(&self) -> bool;

    fn synthesis(&mut self, bs_exp: u8, floor: &mut [f32]) -> Result<()>;
}

#[derive(Debug)]
struct Floor0Setup {
    /// The number of LSP coefficients (the filter order).
    order: u8,
    /// The resolution of the Bark-scale frequency maps.
    bark_map_size: u16,
    /// The width in bits of the per-packet amplitude field.
    amplitude_bits: u8,
    amplitude_offset: u8,
    /// The codebooks coefficients may be coded with.
    num_books: u8,
    book_list: [u8; 16],
    /// The block size exponent the short Bark map was computed for.
    map_short_bs_exp: u8,
    /// Bark-scale frequency maps for short and long blocks, computed once at setup.
    map_short: Vec<i32>,
    map_long: Vec<i32>,
}

pub struct Floor0 {
    setup: Floor0Setup,
    is_unused: bool,
    amplitude: u64,
    coeffs: [f32; 256],
}

impl Floor0 {
    pub fn try_read(
        bs: &mut BitReaderRtl<'_>,
        bs0_exp: u8,
        bs1_exp: u8,
        max_codebook: u8,
    ) -> Result<Box<dyn Floor>> {
        let setup = Self::read_setup(bs, bs0_exp, bs1_exp, max_codebook)?;

        Ok(Box::new(Floor0 { setup, is_unused: false, amplitude: 0, coeffs: [0.0; 256] }))
    }

    fn read_setup(
        bs: &mut BitReaderRtl<'_>,
        bs0_exp: u8,
        bs1_exp: u8,
        max_codebook: u8,
    ) -> Result<Floor0Setup> {
        let order = bs.read_bits_leq32(8)? as u8;
        let rate = bs.read_bits_leq32(16)? as u16;
        let bark_map_size = bs.read_bits_leq32(16)? as u16;
        let amplitude_bits = bs.read_bits_leq32(6)? as u8;
        let amplitude_offset = bs.read_bits_leq32(8)? as u8;
        let num_books = bs.read_bits_leq32(4)? as u8 + 1;

        if order == 0 || rate == 0 || bark_map_size == 0 {
            return decode_error("vorbis: floor0, invalid setup parameter");
        }

        let mut book_list = [0; 16];

        for book in book_list[..usize::from(num_books)].iter_mut() {
            *book = bs.read_bits_leq32(8)? as u8;

            if *book >= max_codebook {
                return decode_error("vorbis: floor0, invalid codebook number");
            }
        }

        // The mapping of spectral bins onto the Bark scale depends only on setup values, so
        // both block sizes get their map up front.
        let map_short = bark_map(1 << (bs0_exp - 1), rate, bark_map_size);
        let map_long = bark_map(1 << (bs1_exp - 1), rate, bark_map_size);

        Ok(Floor0Setup {
            order,
            bark_map_size,
            amplitude_bits,
            amplitude_offset,
            num_books,
            book_list,
            map_short_bs_exp: bs0_exp,
            map_short,
            map_long,
        })
    }

    /// Decode the per-packet floor data. Returns whether the floor is in use this packet.
    fn decode_channel(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
    ) -> Result<bool> {
        self.amplitude = bs.read_bits_leq64(u32::from(self.setup.amplitude_bits))?;

        // A zero amplitude silences the channel for this packet.
        if self.amplitude == 0 {
            return Ok(false);
        }

        // The packet names one of the floor's codebooks, by index into its book list.
        let book_idx = bs.read_bits_leq32(ilog(u32::from(self.setup.num_books)))? as usize;

        if book_idx >= usize::from(self.setup.num_books) {
            return decode_error("vorbis: floor0, invalid book index");
        }

        let codebook = &codebooks[usize::from(self.setup.book_list[book_idx])];

        // Read LSP coefficients until the filter order is satisfied. The coefficients
        // accumulate: every vector read is offset by the final coefficient of the previous
        // vector. A vector may carry more scalars than the order still needs, the excess is
        // dropped.
        let order = usize::from(self.setup.order);

        let mut count = 0;
        let mut last = 0.0;

        while count < order {
            let vq = codebook.read_vq(bs)?;

            let take = min(order - count, vq.len());

            for (c, &v) in self.coeffs[count..count + take].iter_mut().zip(vq) {
                *c = last + v;
            }

            count += take;
            last = self.coeffs[count - 1];
        }

        // The curve synthesis below only ever needs 2cos(coeff), so transform them in place.
        for coeff in self.coeffs[..order].iter_mut() {
            *coeff = 2.0 * coeff.cos();
        }

        Ok(true)
    }
}

impl Floor for Floor0 {
    fn read_channel(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
    ) -> Result<()> {
        // The floor stays unused unless it decodes completely. Running out of packet bits
        // mid-floor is legal and leaves the channel silent.
        self.is_unused = true;

        match self.decode_channel(bs, codebooks) {
            Ok(is_used) => {
                self.is_unused = !is_used;
                Ok(())
            }
            Err(ref e) if is_end_of_packet(e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn is_unused(&self) -> bool {
        self.is_unused
    }

    fn synthesis(&mut self, bs_exp: u8, floor: &mut [f32]) -> Result<()> {
        debug_assert!(!self.is_unused);

        let n = (1 << bs_exp) >> 1;

        let map =
            if bs_exp == self.setup.map_short_bs_exp { &self.setup.map_short } else { &self.setup.map_long };

        let omega_step = std::f32::consts::PI / f32::from(self.setup.bark_map_size);

        // Evaluate the LSP filter response once per distinct Bark map value, and splat the
        // result over the run of bins sharing that value (section 6.2.3 of the Vorbis I
        // specification).
        let mut i = 0;

        while i < n {
            let map_value = map[i];

            let omega = omega_step * map_value as f32;
            let cos_omega = omega.cos();
            let two_cos_omega = 2.0 * cos_omega;

            // The coefficients at even offsets drive the q product, the odd offsets drive p.
            let mut p = 1.0;
            let mut q = 1.0;

            let mut pairs = self.coeffs[..usize::from(self.setup.order)].chunks_exact(2);

            for pair in &mut pairs {
                q *= pair[0] - two_cos_omega;
                p *= pair[1] - two_cos_omega;
            }

            // An odd order leaves one final coefficient for q, and changes the closing terms.
            match pairs.remainder() {
                [last] => {
                    q *= *last - two_cos_omega;

                    p = p * p * (1.0 - cos_omega * cos_omega);
                    q = q * q * 0.25;
                }
                _ => {
                    p = p * p * ((1.0 - cos_omega) / 2.0);
                    q = q * q * ((1.0 + cos_omega) / 2.0);
                }
            }

            if p + q == 0.0 {
                return decode_error("vorbis: invalid floor0 coefficients");
            }

            let value = linear_floor0_value(
                p,
                q,
                self.amplitude,
                self.setup.amplitude_bits,
                self.setup.amplitude_offset,
            );

            // Fill every consecutive bin mapped to the same Bark value.
            while i < n && map[i] == map_value {
                floor[i] = value;
                i += 1;
            }
        }

        Ok(())
    }
}

/// The Bark scale warp (section 6.2.3 of the Vorbis I specification).
#[inline(always)]
fn bark(x: f64) -> f64 {
    (13.1 * (0.00074 * x).atan()) + (2.24 * (0.0000000185 * x * x).atan()) + (0.0001 * x)
}

/// Map `n` linearly spaced spectral bins onto `bark_map_size` Bark-scale bands at the given
/// sample rate.
fn bark_map(n: u32, rate: u16, bark_map_size: u16) -> Vec<i32> {
    let rate = f64::from(rate);

    let scale = f64::from(bark_map_size) / bark(0.5 * rate);
    let bin_width = rate / (2.0 * f64::from(n));

    let band_max = i32::from(bark_map_size) - 1;

    (0..n)
        .map(|i| {
            let band = (bark(bin_width * f64::from(i)) * scale).floor() as i32;
            band.min(band_max)
        })
        .collect()
}

/// Convert the LSP filter response at one frequency into a linear floor value (section 6.2.3 of
/// the Vorbis I specification).
#[inline(always)]
fn linear_floor0_value(
    p: f32,
    q: f32,
    amplitude: u64,
    amplitude_bits: u8,
    amplitude_offset: u8,
) -> f32 {
    // The amplitude field may be up-to 63 bits wide, which no float fully represents. Values
    // that large never occur in practice, so wrap rather than panic and let the conversion
    // truncate.
    let num = amplitude.wrapping_mul(u64::from(amplitude_offset)) as f32;
    let den = (p + q).sqrt() * ((1u64 << amplitude_bits) - 1) as f32;

    (0.11512925 * ((num / den) - f32::from(amplitude_offset))).exp()
}

#[derive(Debug, Default)]
struct Floor1Class {
    /// The codebook that encodes the subclass selector.
    mainbook: u8,
    /// The number of curve points this class contributes.
    dimensions: u8,
    /// log2 of the number of subclasses.
    subclass_bits: u8,
    /// The codebook of each subclass, and a bitmap of which subclasses have one.
    subbooks: [u8; 8],
    is_subbook_used: u8,
}

#[derive(Debug)]
struct Floor1Setup {
    /// The number of partitions (up-to 31).
    partitions: usize,
    /// The class of each partition.
    partition_classes: [u8; 32],
    /// The classes (up-to 16).
    classes: [Floor1Class; 16],
    /// The y-value quantization granularity selector (1 to 4).
    multiplier: u8,
    /// The x-coordinate of every curve point, in decode order.
    x_list: Vec<u32>,
    /// Indices of `x_list` ordered by ascending x-coordinate.
    x_list_sort_order: Vec<u8>,
    /// For each point, the low and high neighbors among the points that precede it.
    x_list_neighbors: Vec<(usize, usize)>,
}

pub struct Floor1 {
    setup: Floor1Setup,
    is_unused: bool,
    y_values: Vec<u32>,
    final_y: Vec<i32>,
    step2_flags: Vec<bool>,
}

impl Floor1 {
    pub fn try_read(bs: &mut BitReaderRtl<'_>, max_codebook: u8) -> Result<Box<dyn Floor>> {
        let setup = Self::read_setup(bs, max_codebook)?;

        let num_points = setup.x_list.len();

        Ok(Box::new(Floor1 {
            setup,
            is_unused: false,
            y_values: vec![0; num_points],
            final_y: vec![0; num_points],
            step2_flags: vec![false; num_points],
        }))
    }

    fn read_setup(bs: &mut BitReaderRtl<'_>, max_codebook: u8) -> Result<Floor1Setup> {
        let partitions = bs.read_bits_leq32(5)? as usize;

        let mut partition_classes = [0u8; 32];
        let mut classes: [Floor1Class; 16] = Default::default();

        if partitions > 0 {
            // The class of each partition, 4 bits each. The highest class mentioned determines
            // how many class descriptors follow.
            let mut max_class = 0;

            for class_idx in partition_classes[..partitions].iter_mut() {
                *class_idx = bs.read_bits_leq32(4)? as u8;
                max_class = max_class.max(*class_idx);
            }

            for class in classes[..usize::from(max_class) + 1].iter_mut() {
                class.dimensions = bs.read_bits_leq32(3)? as u8 + 1;
                class.subclass_bits = bs.read_bits_leq32(2)? as u8;

                // With subclasses, a main codebook selects which subclass codes each point.
                if class.subclass_bits != 0 {
                    let mainbook = bs.read_bits_leq32(8)? as u8;

                    if mainbook >= max_codebook {
                        return decode_error("vorbis: floor1, invalid codebook for class");
                    }

                    class.mainbook = mainbook;
                }

                // Each subclass may name a codebook. The value is stored off-by-one so that 0
                // can mean "no codebook".
                for (sub, book) in
                    class.subbooks[..1usize << class.subclass_bits].iter_mut().enumerate()
                {
                    *book = bs.read_bits_leq32(8)? as u8;

                    if *book > 0 {
                        *book -= 1;

                        if *book >= max_codebook {
                            return decode_error("vorbis: floor1, invalid codebook for subclass");
                        }

                        class.is_subbook_used |= 1 << sub;
                    }
                }
            }
        }

        let multiplier = bs.read_bits_leq32(2)? as u8 + 1;

        // The x-coordinates: the two range endpoints first, then the points of each partition.
        // Coordinates must be unique, and the total may not exceed 65 points.
        let rangebits = bs.read_bits_leq32(4)?;

        let mut x_list = vec![0, 1 << rangebits];
        let mut x_seen: HashSet<u32> = x_list.iter().copied().collect();

        for &class_idx in partition_classes[..partitions].iter() {
            let class = &classes[usize::from(class_idx)];

            if x_list.len() + usize::from(class.dimensions) > 65 {
                return decode_error("vorbis: floor1, x_list too long");
            }

            for _ in 0..class.dimensions {
                let x = bs.read_bits_leq32(rangebits)?;

                if !x_seen.insert(x) {
                    return decode_error("vorbis: floor1, x_list is not unique");
                }

                x_list.push(x);
            }
        }

        // The curve render needs the points in x order, and the predictor needs each point's
        // neighbors. Both depend only on the x-list, so compute them now.
        let x_list_neighbors =
            (0..x_list.len()).map(|i| find_neighbors(&x_list, i)).collect();

        let mut x_list_sort_order: Vec<u8> = (0..x_list.len() as u8).collect();
        x_list_sort_order.sort_by_key(|&i| x_list[usize::from(i)]);

        Ok(Floor1Setup {
            partitions,
            partition_classes,
            classes,
            multiplier,
            x_list,
            x_list_neighbors,
            x_list_sort_order,
        })
    }

    /// Decode the per-packet floor data. Returns whether the floor is in use this packet.
    fn decode_channel(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
    ) -> Result<bool> {
        // A cleared leading bit silences the channel for this packet.
        if !bs.read_bool()? {
            return Ok(false);
        }

        // The y-values of the two range endpoints are coded plainly (section 7.3.2).
        let range = get_range(self.setup.multiplier);
        let range_bits = ilog(range - 1);

        self.y_values[0] = bs.read_bits_leq32(range_bits)?;
        self.y_values[1] = bs.read_bits_leq32(range_bits)?;

        // The remaining y-values arrive partition by partition. Within a partition, the class's
        // main codebook selects a subclass per point, and the subclass's codebook (if any)
        // codes the value.
        let mut offset = 2;

        for &class_idx in self.setup.partition_classes[..self.setup.partitions].iter() {
            let class = &self.setup.classes[usize::from(class_idx)];

            let cdim = usize::from(class.dimensions);
            let cbits = class.subclass_bits;
            let csub = (1u32 << cbits) - 1;

            let mut cval = 0;

            if cbits > 0 {
                cval = codebooks[usize::from(class.mainbook)].read_scalar(bs)?;
            }

            for y in self.y_values[offset..offset + cdim].iter_mut() {
                let subclass_idx = cval & csub;

                cval >>= cbits;

                *y = if class.is_subbook_used & (1 << subclass_idx) != 0 {
                    let subbook = usize::from(class.subbooks[subclass_idx as usize]);
                    codebooks[subbook].read_scalar(bs)?
                }
                else {
                    0
                };
            }

            offset += cdim;
        }

        Ok(true)
    }

    fn synthesis_step1(&mut self) {
        // Each y-value past the first two encodes an offset against the value predicted by the
        // line through its neighbors (section 7.3.4). Points whose offset is zero ride the
        // prediction and do not anchor a line segment in step 2.
        let range = get_range(self.setup.multiplier) as i32;

        self.step2_flags[0] = true;
        self.step2_flags[1] = true;

        self.final_y[0] = self.y_values[0] as i32;
        self.final_y[1] = self.y_values[1] as i32;

        for i in 2..self.setup.x_list.len() {
            let (low, high) = self.setup.x_list_neighbors[i];

            let predicted = render_point(
                self.setup.x_list[low],
                self.final_y[low],
                self.setup.x_list[high],
                self.final_y[high],
                self.setup.x_list[i],
            );

            let val = self.y_values[i] as i32;

            if val == 0 {
                self.step2_flags[i] = false;
                self.final_y[i] = predicted;
                continue;
            }

            // A non-zero offset pins this point and both its neighbors.
            self.step2_flags[low] = true;
            self.step2_flags[high] = true;
            self.step2_flags[i] = true;

            // Offsets are folded so that small magnitudes stay near the prediction: while the
            // offset fits the shorter side of the headroom it alternates sign by parity, past
            // that it runs out the longer side.
            let highroom = range - predicted;
            let lowroom = predicted;
            let room = 2 * highroom.min(lowroom);

            self.final_y[i] = if val >= room {
                if highroom > lowroom {
                    val - lowroom + predicted
                }
                else {
                    predicted - val + highroom - 1
                }
            }
            else if val & 1 == 1 {
                predicted - ((val + 1) / 2)
            }
            else {
                predicted + (val / 2)
            };
        }
    }

    fn synthesis_step2(&mut self, n: u32, floor: &mut [f32]) {
        // Walk the pinned points in x order, drawing a line segment between each consecutive
        // pair, and extend the final value to the end of the spectrum.
        let multiplier = i32::from(self.setup.multiplier);

        let first = usize::from(self.setup.x_list_sort_order[0]);

        let mut lx = 0;
        let mut ly = self.final_y[first] * multiplier;
        let mut hx = 0;
        let mut hy = 0;

        for &i in self.setup.x_list_sort_order[1..].iter() {
            let i = usize::from(i);

            if !self.step2_flags[i] {
                continue;
            }

            hx = self.setup.x_list[i];
            hy = self.final_y[i] * multiplier;

            render_line(lx, ly, hx, hy, n as usize, floor);

            lx = hx;
            ly = hy;
        }

        if hx < n {
            render_line(hx, hy, n, hy, n as usize, floor);
        }
    }
}

impl Floor for Floor1 {
    fn read_channel(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
    ) -> Result<()> {
        // The floor stays unused unless it decodes completely. Running out of packet bits
        // mid-floor is legal and leaves the channel silent.
        self.is_unused = true;

        match self.decode_channel(bs, codebooks) {
            Ok(is_used) => {
                self.is_unused = !is_used;
                Ok(())
            }
            Err(ref e) if is_end_of_packet(e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn is_unused(&self) -> bool {
        self.is_unused
    }

    fn synthesis(&mut self, bs_exp: u8, floor: &mut [f32]) -> Result<()> {
        debug_assert!(!self.is_unused);
        self.synthesis_step1();
        self.synthesis_step2((1 << bs_exp) >> 1, floor);
        Ok(())
    }
}

/// The y-value range selected by the floor multiplier (section 7.3.2).
#[inline(always)]
fn get_range(multiplier: u8) -> u32 {
    match multiplier {
        1 => 256,
        2 => 128,
        3 => 86,
        4 => 64,
        _ => unreachable!(),
    }
}

/// Find, among the elements preceding position `x`, the position of the greatest value below
/// `v[x]` and the position of the smallest value above it (sections 9.2.4 and 9.2.5).
#[inline(always)]
fn find_neighbors(v: &[u32], x: usize) -> (usize, usize) {
    let pivot = v[x];

    let mut below = u32::MIN;
    let mut above = u32::MAX;

    let mut neighbors = (0, 0);

    for (i, &value) in v[..x].iter().enumerate() {
        if value < pivot && value >= below {
            below = value;
            neighbors.0 = i;
        }

        if value > pivot && value <= above {
            above = value;
            neighbors.1 = i;
        }
    }

    neighbors
}

/// Evaluate, at `x`, the integer line through (x0, y0) and (x1, y1) (section 9.2.6).
#[inline(always)]
fn render_point(x0: u32, y0: i32, x1: u32, y1: i32, x: u32) -> i32 {
    let dy = y1 - y0;
    let adx = x1 - x0;

    let off = (dy.unsigned_abs() * (x - x0)) / adx;

    if dy < 0 {
        y0 - off as i32
    }
    else {
        y0 + off as i32
    }
}

/// Rasterize the integer line from (x0, y0) to (x1, y1), writing the dB-to-linear conversion of
/// each y into `v`, clipped to `n` values (section 7.3.5).
fn render_line(x0: u32, y0: i32, x1: u32, y1: i32, n: usize, v: &mut [f32]) {
    let dy = y1 - y0;
    let adx = (x1 - x0) as i32;

    // The slope splits into an integer step per x and an error accumulator for the remainder.
    let base = dy / adx;
    let ady = dy.abs() - base.abs() * adx;

    let sy = if dy < 0 { base - 1 } else { base + 1 };

    if x0 as usize >= n {
        return;
    }

    let mut y = y0;
    let mut err = 0;

    v[x0 as usize] = FLOOR1_INVERSE_DB_TABLE[y.clamp(0, 255) as usize];

    for v in v[x0 as usize + 1..min(n, x1 as usize)].iter_mut() {
        err += ady;

        y += if err >= adx {
            err -= adx;
            sy
        }
        else {
            base
        };

        *v = FLOOR1_INVERSE_DB_TABLE[y.clamp(0, 255) as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::{find_neighbors, render_line, render_point, FLOOR1_INVERSE_DB_TABLE};

    #[test]
    fn verify_render_point() {
        // Midpoint of a rising line.
        assert_eq!(render_point(0, 0, 128, 64, 64), 32);
        // Midpoint of a falling line.
        assert_eq!(render_point(0, 64, 128, 0, 64), 32);
        // A point on a flat line.
        assert_eq!(render_point(16, 10, 16 + 32, 10, 32), 10);
    }

    #[test]
    fn verify_find_neighbors() {
        // The first two elements of an x-list are always the range bounds, the remainder are in
        // partition order.
        let x_list = [0, 128, 64, 32, 96];

        // For element 3 (value 32), the low neighbor is 0 and the high neighbor is 64.
        assert_eq!(find_neighbors(&x_list, 3), (0, 2));

        // For element 4 (value 96), the low neighbor is 64 and the high neighbor is 128.
        assert_eq!(find_neighbors(&x_list, 4), (2, 1));
    }

    #[test]
    fn verify_render_line_flat() {
        let mut v = [0.0f32; 16];

        render_line(0, 128, 16, 128, 16, &mut v);

        for &value in v.iter() {
            assert_eq!(value, FLOOR1_INVERSE_DB_TABLE[128]);
        }
    }

    #[test]
    fn verify_render_line_slope() {
        let mut v = [0.0f32; 16];

        // A line from y=0 to y=16 over 16 steps increments y by exactly one per step.
        render_line(0, 0, 16, 16, 16, &mut v);

        for (i, &value) in v.iter().enumerate() {
            assert_eq!(value, FLOOR1_INVERSE_DB_TABLE[i]);
        }
    }
}
