//! Built-in register descriptions
//!
//! These are used when no description file is supplied. Each function returns
//! a width-independent [`RegisterDescription`]; the profiles bind them to
//! their register widths:
//!
//! | Family | Address | Value |
//! |---|---|---|
//! | Avian BGT60TRxxD | `u8` | `u32` (24 bits used) |
//! | LTR11 | `u8` | `u16` |
//! | Mimose BGT24ATR22 | `u16` | `u16` |

use super::{BitField, Layout, RegisterDescription};

fn bf(name: &str, offset: u32, width: u32) -> BitField {
    BitField::new(name, width, offset)
}

fn add_layout(description: &mut RegisterDescription, name: &str, bitfields: Vec<BitField>) -> usize {
    description.layouts.push(Layout::new(name, bitfields));
    description.layouts.len() - 1
}

/// Avian BGT60TRxxD register file (`NUM_REGISTERS` = 0x63)
pub fn avian_d() -> RegisterDescription {
    let mut d = RegisterDescription::default();

    d.push(
        "MAIN",
        0x00,
        0x1C_8E00,
        vec![
            bf("FRAME_START", 0, 1),
            bf("SW_RESET", 1, 1),
            bf("FSM_RESET", 2, 1),
            bf("FIFO_RESET", 3, 1),
            bf("TR_TWKUP", 4, 8),
            bf("TR_TWKUP_MUL", 12, 4),
            bf("CW_MODE", 16, 1),
            bf("SADC_BG_CLK_DIV", 17, 2),
            bf("MADC_BG_CLK_DIV", 19, 2),
            bf("LOAD_STRENGTH", 21, 2),
            bf("LDO_MODE", 23, 1),
        ],
    );
    d.push(
        "ADC0",
        0x01,
        0x0A_0240,
        vec![
            bf("ADC_OVERS_CFG", 0, 2),
            bf("BG_TC_TRIM", 2, 3),
            bf("BG_CHOP_EN", 5, 1),
            bf("STC", 6, 2),
            bf("DSCAL", 8, 1),
            bf("TRACK_CFG", 9, 2),
            bf("MSB_CTRL", 11, 1),
            bf("TRIG_MADC", 12, 2),
            bf("ADC_DIV", 14, 10),
        ],
    );
    d.push("CHIP_ID", 0x02, 0, vec![bf("RF_ID", 0, 8), bf("DIGITAL_ID", 8, 16)]);
    d.push(
        "STAT1",
        0x03,
        0,
        vec![bf("SHAPE_GRP_CNT", 0, 12), bf("FRAME_CNT", 12, 12)],
    );
    d.push("PACR1", 0x04, 0xE8_7FF8, vec![bf("OSCCLKEN", 23, 1)]);
    d.push(
        "PACR2",
        0x05,
        0x08_0074,
        vec![
            bf("DIVSET", 0, 5),
            bf("DIVEN", 5, 1),
            bf("FSTDNEN", 6, 2),
            bf("FSDNTMR", 8, 9),
            bf("TRIVREG", 17, 1),
            bf("DTSEL", 18, 2),
            bf("PLL_SPARE", 20, 1),
            bf("TR_DIVEN", 21, 3),
        ],
    );
    d.push(
        "SFCTL",
        0x06,
        0x10_2000,
        vec![
            bf("FIFO_CREF", 0, 13),
            bf("FIFO_PD_MODE", 14, 2),
            bf("MISO_HS_READ", 16, 1),
            bf("LFSR_EN", 17, 1),
            bf("PREFIX_EN", 18, 1),
            bf("PAD_MODE", 19, 1),
            bf("QSPI_WT", 20, 4),
        ],
    );
    d.push(
        "SADC_CTRL",
        0x07,
        0x00_0500,
        vec![
            bf("SADC_CHSEL", 0, 4),
            bf("START_SADC", 4, 1),
            bf("SADC_CLK_DIV", 6, 2),
            bf("SD_EN", 8, 1),
            bf("OVERS_CFG", 9, 2),
            bf("SESP", 11, 1),
            bf("LVGAIN", 12, 1),
            bf("DSCAL", 13, 1),
            bf("TC_TRIM", 14, 3),
        ],
    );

    let mut cs0 = vec![
        bf("TX1_EN", 0, 1),
        bf("PD1_EN", 1, 1),
        bf("TX2_EN", 2, 1),
        bf("PD2_EN", 3, 1),
        bf("VCO_EN", 4, 1),
        bf("TEMP_MEAS_EN", 5, 1),
        bf("FDIV_EN", 6, 1),
        bf("LO_DIST2_EN", 10, 1),
        bf("LO_DIST1_EN", 11, 1),
    ];
    for rx in 0..4u32 {
        cs0.push(bf(&format!("RX{}LOBUF_EN", rx + 1), 12 + 2 * rx, 1));
        cs0.push(bf(&format!("RX{}MIX_EN", rx + 1), 13 + 2 * rx, 1));
    }
    for rx in 0..4u32 {
        cs0.push(bf(&format!("ABB{}_AAF_CTRL", rx + 1), 20 + rx, 1));
    }
    let cs0 = add_layout(&mut d, "CS_0", cs0);

    let mut cs1 = vec![bf("TX1_DAC", 0, 5), bf("TX2_DAC", 5, 5)];
    for rx in 0..4u32 {
        cs1.push(bf(&format!("HP{}_GAIN", rx + 1), 10 + rx, 1));
    }
    cs1.push(bf("BB_RSTCNT", 14, 6));
    for rx in 0..4u32 {
        cs1.push(bf(&format!("MADC_BBCH{}_EN", rx + 1), 20 + rx, 1));
    }
    let cs1 = add_layout(&mut d, "CS_1", cs1);

    let mut cs2 = Vec::new();
    for rx in 0..4u32 {
        cs2.push(bf(&format!("HPF_SEL{}", rx + 1), 6 * rx, 3));
        cs2.push(bf(&format!("VGA_GAIN{}", rx + 1), 6 * rx + 3, 3));
    }
    let cs2 = add_layout(&mut d, "CS_2", cs2);

    let cs_ctrl = add_layout(
        &mut d,
        "CS",
        vec![
            bf("REPCS", 0, 4),
            bf("CS_EN", 4, 1),
            bf("ABB_ISOPD", 5, 1),
            bf("RF_ISOPD", 6, 1),
            bf("MADC_BG_EN", 7, 1),
            bf("MADC_ISOPD", 8, 1),
            bf("SADC_ISOPD", 9, 1),
            bf("BG_TMRF_EN", 10, 1),
            bf("PLL_ISOPD", 11, 1),
        ],
    );

    d.push_shared("CSP_I_0", 0x08, 0, cs0);
    d.push_shared("CSP_I_1", 0x09, 0, cs1);
    d.push_shared("CSP_I_2", 0x0A, 0, cs2);
    d.push(
        "CSCI",
        0x0B,
        0x00_0FE0,
        vec![
            bf("REPCS", 0, 4),
            bf("CS_EN", 4, 1),
            bf("ABB_ISOPD", 5, 1),
            bf("RF_ISOPD", 6, 1),
            bf("MADC_BG_EN", 7, 1),
            bf("MADC_ISOPD", 8, 1),
            bf("SADC_ISOPD", 9, 1),
            bf("BG_TMRF_EN", 10, 1),
            bf("PLL_ISOPD", 11, 1),
            bf("TR_PLL_ISOPD", 12, 6),
            bf("TR_MADCEN", 18, 3),
            bf("TR_BGEN", 21, 3),
        ],
    );
    d.push_shared("CSP_D_0", 0x0C, 0, cs0);
    d.push_shared("CSP_D_1", 0x0D, 0, cs1);
    d.push_shared("CSP_D_2", 0x0E, 0, cs2);
    d.push_shared("CSCDS", 0x0F, 0x00_0FE0, cs_ctrl);

    for shape in 0..4u32 {
        let base = 0x10 + 7 * shape;
        let n = shape + 1;
        d.push_shared(&format!("CS{}_U_0", n), base, 0, cs0);
        d.push_shared(&format!("CS{}_U_1", n), base + 1, 0, cs1);
        d.push_shared(&format!("CS{}_U_2", n), base + 2, 0, cs2);
        d.push_shared(&format!("CS{}_D_0", n), base + 3, 0, cs0);
        d.push_shared(&format!("CS{}_D_1", n), base + 4, 0, cs1);
        d.push_shared(&format!("CS{}_D_2", n), base + 5, 0, cs2);
        d.push_shared(&format!("CS{}", n), base + 6, 0x00_0FE0, cs_ctrl);
    }

    d.push(
        "CCR0",
        0x2C,
        0x11_BE0E,
        vec![
            bf("TR_END", 0, 9),
            bf("CONT_MODE", 9, 1),
            bf("REPT", 10, 4),
            bf("TR_INIT1", 14, 8),
            bf("TR_MUL1", 22, 2),
        ],
    );
    d.push(
        "CCR1",
        0x2D,
        0x3F_000A,
        vec![
            bf("TR_START", 0, 9),
            bf("PD_MODE", 9, 2),
            bf("TR_FED", 11, 8),
            bf("TR_FED_MUL", 19, 5),
        ],
    );
    d.push(
        "CCR2",
        0x2E,
        0,
        vec![bf("MAX_FRAME_CNT", 0, 12), bf("FRAME_LEN", 12, 12)],
    );
    d.push(
        "CCR3",
        0x2F,
        0x7F_FFFF,
        vec![
            bf("TR_PAEN", 0, 9),
            bf("TR_SSTART", 9, 6),
            bf("TR_INIT0", 15, 7),
            bf("TR_INIT0_MUL", 22, 2),
        ],
    );

    let pll0 = add_layout(&mut d, "PLL_0", vec![bf("FSU", 0, 24)]);
    let pll1 = add_layout(&mut d, "PLL_1", vec![bf("RSU", 0, 24)]);
    let pll2 = add_layout(&mut d, "PLL_2", vec![bf("RTU", 0, 14), bf("TEDU", 16, 8)]);
    let pll3 = add_layout(&mut d, "PLL_3", vec![bf("APU", 0, 12), bf("APD", 12, 12)]);
    let pll4 = add_layout(&mut d, "PLL_4", vec![bf("FSD", 0, 24)]);
    let pll5 = add_layout(&mut d, "PLL_5", vec![bf("RSD", 0, 24)]);
    let pll6 = add_layout(&mut d, "PLL_6", vec![bf("RTD", 0, 14), bf("TEDD", 16, 8)]);
    let pll7 = add_layout(
        &mut d,
        "PLL_7",
        vec![
            bf("REPS", 0, 4),
            bf("SH_EN", 4, 1),
            bf("CONT_MODE", 8, 1),
            bf("PD_MODE", 9, 2),
            bf("TR_SED", 11, 8),
            bf("TR_SED_MUL", 19, 5),
        ],
    );
    for shape in 0..4u32 {
        let base = 0x30 + 8 * shape;
        let n = shape + 1;
        for (i, layout) in [pll0, pll1, pll2, pll3, pll4, pll5, pll6, pll7].into_iter().enumerate() {
            d.push_shared(&format!("PLL{}_{}", n, i), base + i as u32, 0, layout);
        }
    }

    for (i, name) in ["ADC1", "ADC2", "ADC3", "ADC4", "ADC5"].into_iter().enumerate() {
        d.push(name, 0x50 + i as u32, 0, vec![]);
    }
    let mut rft0 = vec![bf("RFTSIGCLK_DIV", 0, 13), bf("RFTSIGCLK_DIV_EN", 13, 1)];
    for rx in 0..4u32 {
        rft0.push(bf(&format!("TEST_SIG_RF{}_EN", rx + 1), 14 + rx, 1));
    }
    for rx in 0..4u32 {
        rft0.push(bf(&format!("TEST_SIG_IF{}_EN", rx + 1), 18 + rx, 1));
    }
    rft0.push(bf("RF_TEST_MODE", 22, 2));
    d.push("RFT0", 0x55, 0, rft0);
    d.push("PDFT0", 0x59, 0, vec![bf("BYPRMPEN", 0, 1)]);
    for (address, name) in [
        (0x56, "RFT1"),
        (0x57, "DFT0"),
        (0x58, "DFT1"),
        (0x5A, "PDFT1"),
        (0x5B, "SADC_DFT0"),
        (0x5C, "SADC_DFT1"),
        (0x5D, "STAT0"),
    ] {
        d.push(name, address, 0, vec![]);
    }
    d.push(
        "SADC_RESULT",
        0x5E,
        0,
        vec![bf("RESULT", 0, 10), bf("BUSY", 10, 1), bf("RAW", 12, 10)],
    );
    d.push(
        "FSTAT",
        0x5F,
        0,
        vec![
            bf("FILL_STATUS", 0, 14),
            bf("RAM_PWR_DOWN", 14, 1),
            bf("CLK_NUM_ERR", 17, 1),
            bf("BURST_ERR", 18, 1),
            bf("FUF_ERR", 19, 1),
            bf("EMPTY", 20, 1),
            bf("CREF", 21, 1),
            bf("FULL", 22, 1),
            bf("FOF_ERR", 23, 1),
        ],
    );
    d.push("DEV_ID0", 0x60, 0, vec![]);
    d.push("DEV_ID1", 0x61, 0, vec![]);
    d.push("FD", 0x62, 0, vec![]);

    d
}

/// LTR11 pulsed-Doppler register bank
pub fn ltr11() -> RegisterDescription {
    let mut d = RegisterDescription::default();

    d.push("REG0", 0x00, 0, vec![]);
    d.push("REG1", 0x01, 0, vec![bf("BB_DIG_DET_DIS", 7, 1)]);
    d.push("REG2", 0x02, 0x0050, vec![bf("THRES", 0, 13), bf("APRT", 14, 1)]);
    d.push("REG3", 0x03, 0, vec![]);
    d.push("REG4", 0x04, 0x0F3A, vec![]);
    d.push("REG5", 0x05, 0x0F5B, vec![bf("PLL_FCW", 0, 13)]);
    d.push("REG6", 0x06, 0x6800, vec![]);
    d.push(
        "REG7",
        0x07,
        0x0457,
        vec![
            bf("MPA_CTRL", 0, 3),
            bf("DC_ON_PULSE_LEN", 8, 2),
            bf("DC_REP_RATE", 10, 2),
        ],
    );
    d.push("REG8", 0x08, 0, vec![]);
    d.push("REG9", 0x09, 0x0068, vec![bf("BB_CTRL_GAIN", 0, 4)]);
    d.push("REG10", 0x0A, 0x0008, vec![bf("HOLD_TIME", 0, 16)]);
    d.push("REG11", 0x0B, 0, vec![]);
    d.push("REG12", 0x0C, 0, vec![]);
    d.push("REG13", 0x0D, 0, vec![bf("PRT_MULT", 0, 2)]);
    d.push("REG14", 0x0E, 0x4000, vec![]);
    d.push(
        "REG15",
        0x0F,
        0,
        vec![
            bf("STAT_MUX", 0, 4),
            bf("MISO_DRV", 6, 1),
            bf("START_CW", 12, 1),
            bf("START_PM", 14, 1),
        ],
    );
    d.push("ADC_RSL_IFI", 0x28, 0, vec![]);
    d.push("ADC_RSL_IFQ", 0x29, 0, vec![]);
    d.push("E_FUSES", 0x37, 0x8000, vec![bf("NOT_JAPAN", 15, 1)]);
    d.push("STS_CHIP_VER", 0x38, 0, vec![]);
    d.push(
        "DETECTOR_OUT",
        0xFF,
        0,
        vec![bf("MOTION", 0, 1), bf("DIRECTION", 1, 1)],
    );

    d
}

/// First address of the Mimose raw sample memory
pub const MIMOSE_RAW_MEMORY: u32 = 0x3800;

/// Mimose BGT24ATR22 registers used by the compiler and the metadata readout
pub fn mimose() -> RegisterDescription {
    let mut d = RegisterDescription::default();

    d.push(
        "SEQ_MAIN_CONF",
        0x0000,
        0,
        vec![
            bf("SEQ_EXECUTE", 0, 1),
            bf("NEXT_FRAME_CONF", 1, 1),
            bf("SW_RST", 8, 1),
        ],
    );
    d.push("CHIP_TYPE", 0x0002, 0, vec![]);
    d.push(
        "CLK_CONF",
        0x0004,
        0,
        vec![
            bf("SYS_CLK_DIV", 0, 4),
            bf("SYS_CLK_DIV_FLEX", 4, 1),
            bf("SYS_CLK_SEL", 5, 1),
            bf("REF_CLK_SEL", 6, 1),
            bf("SYS_CLK_TO_I2C", 7, 1),
            bf("I2C_CLK_DIV", 8, 2),
        ],
    );
    d.push("XOSC_CLK_CONF", 0x0005, 0, vec![bf("XOSC_DC_DIS", 0, 1)]);
    d.push("I2C_CONF", 0x0006, 0, vec![bf("CLK_GATE", 0, 1)]);
    d.push(
        "RC_CLK_CONF",
        0x0008,
        0,
        vec![bf("EN", 0, 1), bf("TRIM_VAL", 1, 5), bf("RC_COUNT", 6, 1)],
    );
    d.push("RC_T_TRIM", 0x0009, 0, vec![]);
    d.push("RC_TRIM_VAL", 0x000A, 0, vec![]);

    d.push(
        "T_BOOT_REF_CLK",
        0x0010,
        0,
        vec![bf("EXP", 0, 5), bf("MUL", 5, 8), bf("EXP_BG_MULT", 13, 3)],
    );
    let t_boot = add_layout(&mut d, "T_BOOT", vec![bf("VAL", 0, 12)]);
    d.push_shared("T_BOOT_VCO_FS", 0x0011, 0x0F00, t_boot);
    d.push_shared("T_BOOT_TXCHAIN", 0x0012, 0x0060, t_boot);
    d.push_shared("T_BOOT_RXCHAIN", 0x0013, 0x0060, t_boot);
    d.push_shared("T_BOOT_BANDGAP", 0x0014, 0x0180, t_boot);
    d.push("T_AFC", 0x0015, 0x0009, vec![bf("VAL", 0, 12)]);
    d.push(
        "RXABB_HF_ON_T",
        0x0018,
        0x0270,
        vec![bf("EXP", 0, 4), bf("MUL", 4, 12)],
    );
    d.push("RX_T_BIAS", 0x0019, 0, vec![]);
    d.push("RX_T_RF", 0x001A, 0, vec![]);
    d.push("RX_T_MIX", 0x001B, 0, vec![]);
    d.push("RXABB_T_BIAS", 0x001C, 0, vec![]);
    d.push("RXABB_HF_DELAY", 0x001D, 0, vec![]);

    d.push(
        "VCO_AFC_CONF",
        0x0020,
        0x0004,
        vec![
            bf("AFC_REP", 0, 2),
            bf("LO_CNT_DEL", 2, 2),
            bf("AFC_PERIOD", 8, 8),
        ],
    );
    d.push("VCO_AFC_DURATION", 0x0021, 115, vec![bf("VAL", 0, 10)]);
    let afc_th = add_layout(&mut d, "VCO_AFC_TH", vec![bf("THRESHOLD", 0, 8)]);
    d.push_shared("VCO_AFC_TH0", 0x0022, 3, afc_th);
    d.push_shared("VCO_AFC_TH1", 0x0023, 10, afc_th);
    let afc_ref = add_layout(&mut d, "VCO_AFC_REF", vec![bf("LO_CNT_REF", 0, 16)]);
    d.push_shared("VCO_AFC_REF0", 0x0024, 0, afc_ref);
    d.push_shared("VCO_AFC_REF1", 0x0025, 0, afc_ref);
    for (i, name) in [
        "VCO_DAC_VALUE",
        "VCO_AFC_STATUS",
        "VCO_AFC_COUNT",
        "VCO_LO_CNT0",
        "VCO_LO_CNT1",
        "VCO_TRIM0",
        "VCO_TRIM1",
        "VCO_TRIM2",
        "VCO_TRIM3",
    ]
    .into_iter()
    .enumerate()
    {
        d.push(name, 0x0028 + i as u32, 0, vec![]);
    }

    let frame_time = add_layout(&mut d, "FRAME_TIME", vec![bf("EXP", 0, 5), bf("MUL", 5, 11)]);
    let list_rep = add_layout(&mut d, "FRAME_LIST_REP", vec![bf("VAL", 0, 12)]);
    let list_conf = add_layout(
        &mut d,
        "FRAME_LIST_CONF",
        vec![bf("PC_CONF_NR", 0, 2), bf("ENTRY_EN", 2, 1)],
    );
    let heating = add_layout(&mut d, "FRAME_HEATING", vec![bf("NR_HEATING_PULSES", 0, 3)]);
    let trig_irq = add_layout(
        &mut d,
        "FRAME_SEQ_TRIG_MAP_IRQ",
        vec![bf("TRIG_EN", 0, 1), bf("TRIG_MAP", 1, 2), bf("TRIG_COUNT", 4, 12)],
    );
    for frame in 0..2u32 {
        let base = 0x0040 + 0x10 * frame;
        d.push_shared(&format!("FRAME{}_TIME", frame), base, 0, frame_time);
        d.push_shared(&format!("FRAME{}_LIST_REP", frame), base + 1, 0, list_rep);
        for entry in 0..4u32 {
            d.push_shared(
                &format!("FRAME{}_LIST{}_CONF", frame, entry),
                base + 2 + entry,
                0,
                list_conf,
            );
        }
        d.push_shared(&format!("FRAME{}_HEATING", frame), base + 6, 0, heating);
        d.push_shared(&format!("FRAME{}_SEQ_TRIG_MAP_IRQ", frame), base + 7, 0, trig_irq);
    }

    let pc_time = add_layout(&mut d, "PC_CONF_TIME", vec![bf("EXP", 0, 5), bf("MUL", 5, 11)]);
    for pc in 0..4u32 {
        d.push_shared(&format!("PC{}_CONF_TIME", pc), 0x0060 + pc, 0, pc_time);
    }
    let agc = add_layout(
        &mut d,
        "PC_AGC",
        vec![bf("AGC_PC_EN", 0, 1), bf("AGC_ABB_GAIN", 1, 3)],
    );
    for pc in 0..4u32 {
        d.push_shared(&format!("PC{}_AGC", pc), 0x0070 + pc, 0, agc);
    }
    let tx_conf = add_layout(&mut d, "TX_PC_CONF", vec![bf("EN", 0, 1), bf("PWR_DAC", 1, 6)]);
    let rx_conf = add_layout(&mut d, "RX_PC_CONF", vec![bf("EN", 0, 1)]);
    for pc in 0..4u32 {
        let base = 0x0080 + 4 * pc;
        d.push_shared(&format!("TX1_PC{}_CONF", pc), base, 0, tx_conf);
        d.push_shared(&format!("TX2_PC{}_CONF", pc), base + 1, 0, tx_conf);
        d.push_shared(&format!("RX1_PC{}_CONF", pc), base + 2, 0, rx_conf);
        d.push_shared(&format!("RX2_PC{}_CONF", pc), base + 3, 0, rx_conf);
    }

    d.push(
        "AOC_CONF",
        0x00A0,
        0,
        vec![
            bf("MODE0", 0, 2),
            bf("MODE1", 2, 2),
            bf("MODE2", 4, 2),
            bf("MODE3", 6, 2),
        ],
    );
    let aoc_offset = add_layout(&mut d, "AOC_OFFSET", vec![bf("OFFSET", 0, 9)]);
    for pc in 0..4u32 {
        d.push_shared(&format!("AOC_PC{}_I", pc), 0x00A1 + 2 * pc, 0, aoc_offset);
        d.push_shared(&format!("AOC_PC{}_Q", pc), 0x00A2 + 2 * pc, 0, aoc_offset);
    }
    let aoc_th = add_layout(&mut d, "AOC_TH", vec![bf("TH", 0, 13)]);
    let aoc_stp = add_layout(&mut d, "AOC_STP", vec![bf("STP0", 0, 4), bf("STP1", 4, 4)]);
    for pc in 0..4u32 {
        let base = 0x00B0 + 3 * pc;
        d.push_shared(&format!("PC{}_AOC_TH0", pc), base, 0, aoc_th);
        d.push_shared(&format!("PC{}_AOC_TH1", pc), base + 1, 0, aoc_th);
        d.push_shared(&format!("PC{}_AOC_STP", pc), base + 2, 0, aoc_stp);
    }

    let ft = add_layout(&mut d, "FT_CONF", vec![bf("FT_LEN", 0, 2), bf("EN", 2, 1)]);
    for pc in 0..4u32 {
        d.push_shared(&format!("FT{}_CONF", pc), 0x00C0 + pc, 0, ft);
    }

    let mem = add_layout(&mut d, "MEM_OFFSET", vec![bf("OFFSET", 0, 12)]);
    for (i, name) in ["MEM_RAW", "MEM_RAW2", "MEM_FT", "MEM_TRG", "MEM_SENS"]
        .into_iter()
        .enumerate()
    {
        d.push_shared(name, 0x00D0 + i as u32, 0, mem);
    }

    for trig in 0..4u32 {
        d.push(&format!("TRIG{}_CONF", trig), 0x00E0 + trig, 0, vec![]);
    }
    d.push("DRDP_TRIG_MAP", 0x00E4, 0, vec![bf("TRG", 0, 4), bf("CF", 4, 4)]);
    d.push("SEQ_TRIG_MAP", 0x00E5, 0, vec![bf("AP", 0, 4)]);
    d.push("IR_STATUS", 0x00F0, 0, vec![]);
    d.push("IR_EN", 0x00F1, 0, vec![bf("EN8", 8, 1), bf("EN12", 12, 1)]);
    d.push("FRAME_COUNTER", 0x00F2, 0, vec![]);

    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterMap;

    #[test]
    fn test_avian_layout_binds_to_u8_u32() {
        let map: RegisterMap<u8, u32> = RegisterMap::from_description(&avian_d()).unwrap();
        assert_eq!(map.entry("CCR2").unwrap().address, 0x2E);
        assert_eq!(map.entry("PLL2_0").unwrap().address, 0x38);
        assert_eq!(map.entry("CS4").unwrap().address, 0x2B);
        assert_eq!(map.entry("FD").unwrap().address, 0x62);

        let div = map.resolve("ADC0.ADC_DIV").unwrap().field.unwrap();
        assert_eq!(div.mask, 0x00FF_C000);
        let sed = map.resolve("PLL1_7.TR_SED_MUL").unwrap().field.unwrap();
        assert_eq!(sed.mask, 0x00F8_0000);
        let vga = map.resolve("CS1_U_2.VGA_GAIN4").unwrap().field.unwrap();
        assert_eq!(vga.shift, 21);
    }

    #[test]
    fn test_avian_addresses_are_unique() {
        let d = avian_d();
        let mut addresses: Vec<u32> = d.registers.iter().map(|r| r.address).collect();
        addresses.sort_unstable();
        addresses.dedup();
        assert_eq!(addresses.len(), d.registers.len());
        assert_eq!(addresses.len(), 0x63);
    }

    #[test]
    fn test_ltr11_and_mimose_bind() {
        let ltr: RegisterMap<u8, u16> = RegisterMap::from_description(&ltr11()).unwrap();
        assert_eq!(ltr.resolve("REG7.DC_REP_RATE").unwrap().field.unwrap().mask, 0x0C00);
        assert_eq!(ltr.entry("DETECTOR_OUT").unwrap().address, 0xFF);

        let mimose: RegisterMap<u16, u16> = RegisterMap::from_description(&mimose()).unwrap();
        assert_eq!(mimose.entry("FRAME1_TIME").unwrap().address, 0x0050);
        assert_eq!(mimose.entry("PC3_AGC").unwrap().address, 0x0073);
        let count = mimose.resolve("FRAME0_SEQ_TRIG_MAP_IRQ.TRIG_COUNT").unwrap();
        assert_eq!(count.field.unwrap().width(), 12);
    }
}
